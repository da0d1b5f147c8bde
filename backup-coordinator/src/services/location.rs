use shard_agent::repository::parse_location;
use shard_agent::BackupRepository;
use url::Url;

use crate::error::CollectionError;

/// The location an operation works against: the requested one, else the
/// repository's default.
pub fn resolve_location(
    repo: &dyn BackupRepository,
    requested: Option<&str>,
) -> Result<Url, CollectionError> {
    match requested.filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => Ok(parse_location(raw)?),
        None => repo
            .default_location()
            .cloned()
            .ok_or_else(|| CollectionError::MissingLocation(repo.name().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_agent::repository::local::LocalFileSystemRepository;

    #[test]
    fn test_requested_location_wins() {
        let default = Url::parse("file:///srv/default/").unwrap();
        let repo = LocalFileSystemRepository::new("local", Some(default.clone()));

        let url = resolve_location(&repo, Some("/srv/other dir")).unwrap();
        assert_eq!(url.as_str(), "file:///srv/other%20dir/");
        assert_eq!(resolve_location(&repo, None).unwrap(), default);
        assert_eq!(resolve_location(&repo, Some("")).unwrap(), default);
    }

    #[test]
    fn test_missing_location_without_default() {
        let repo = LocalFileSystemRepository::new("bare", None);
        assert!(matches!(
            resolve_location(&repo, None),
            Err(CollectionError::MissingLocation(name)) if name == "bare"
        ));
    }
}
