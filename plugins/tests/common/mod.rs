#![allow(dead_code)]

use std::path::Path;

pub fn write_rep(dir: &Path, file: &str, body: serde_json::Value) {
    std::fs::write(dir.join(file), serde_json::to_vec_pretty(&body).unwrap()).unwrap();
}

pub fn seed_reps(dir: &Path) {
    // sorts before its base on purpose
    write_rep(
        dir,
        "a_api_designer_rep.json",
        serde_json::json!({
            "name": "API_DESIGNER",
            "archetype": "api",
            "base": {"name": "ZZ_PLATFORM"},
            "constraints": ["Document every endpoint"],
            "domain_expertise": {"technologies": ["OpenAPI"]}
        }),
    );
    write_rep(
        dir,
        "generic_rep.json",
        serde_json::json!({"name": "GENERIC", "archetype": "generalist"}),
    );
    write_rep(
        dir,
        "zz_platform_rep.json",
        serde_json::json!({
            "name": "ZZ_PLATFORM",
            "archetype": "platform",
            "constraints": ["Never leak secrets"],
            "tool_permissions": {"filesystem": ["read"], "git": ["*"]}
        }),
    );
    std::fs::write(dir.join("broken_rep.json"), "{ not json").unwrap();
    std::fs::write(dir.join("ignored.json"), "{}").unwrap();
}
