//! Freshness policies.

use super::traits::FreshnessPolicy;

/// Refresh the list only when nothing is cached, and a detail only until
/// it has been fetched once.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyCachePolicy;

impl FreshnessPolicy for EmptyCachePolicy {
  fn should_refresh_list(&self, cache_is_empty: bool) -> bool {
    cache_is_empty
  }

  fn should_refresh_detail(&self, detail_fetched: Option<bool>) -> bool {
    !detail_fetched.unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_list_refreshes_only_when_empty() {
    let policy = EmptyCachePolicy;
    assert!(policy.should_refresh_list(true));
    assert!(!policy.should_refresh_list(false));
  }

  #[test]
  fn test_detail_refreshes_until_fetched() {
    let policy = EmptyCachePolicy;
    assert!(policy.should_refresh_detail(None));
    assert!(policy.should_refresh_detail(Some(false)));
    assert!(!policy.should_refresh_detail(Some(true)));
  }
}
