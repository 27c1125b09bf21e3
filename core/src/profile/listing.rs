use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};

use super::repository::ProfileRepository;
use super::types::{ProfileFilter, RoleProfile};
use super::version::VersionSelector;
use crate::error::RepositoryError;

/// A finite listing of profiles that can be iterated any number of times.
///
/// Nothing is read until [`ProfileListing::stream`] is polled; each call
/// starts a fresh pass over the store, names in lexical order and versions
/// ascending.
#[derive(Debug, Clone)]
pub struct ProfileListing {
    repository: ProfileRepository,
    filter: ProfileFilter,
}

impl ProfileListing {
    pub(crate) fn new(repository: ProfileRepository, filter: ProfileFilter) -> Self {
        Self { repository, filter }
    }

    pub fn filter(&self) -> &ProfileFilter {
        &self.filter
    }

    pub fn stream(&self) -> BoxStream<'static, Result<Arc<RoleProfile>, RepositoryError>> {
        let repository = self.repository.clone();
        let filter = self.filter.clone();

        async_stream::try_stream! {
            let mut names = repository.names().await?;
            names.sort();
            names.dedup();

            for name in names {
                if !filter.matches_name(&name) {
                    continue;
                }

                let selectors = if filter.all_versions {
                    let mut versions = repository.versions(&name).await?;
                    versions.sort();
                    versions.into_iter().map(VersionSelector::Exact).collect()
                } else {
                    vec![VersionSelector::Latest]
                };

                for selector in selectors {
                    let profile = match repository.get(&name, &selector).await {
                        Ok(p) => p,
                        // removed or never indexed between the names() call and now
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => Err(e)?,
                    };
                    if filter.matches(&profile) {
                        yield profile;
                    }
                }
            }
        }
        .boxed()
    }

    pub async fn collect(&self) -> Result<Vec<Arc<RoleProfile>>, RepositoryError> {
        self.stream().try_collect().await
    }
}
