use config_model::{Change, Entries, Key};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("change history references {0}, which is missing from the local config")]
    MissingKey(Key),
}

/// Replays local changes, in order, onto freshly read remote entries.
///
/// Set changes take their value from `local`; keys the changes never touch
/// keep whatever the remote holds.
pub(crate) fn replay(
    mut remote: Entries,
    changes: &[Change],
    local: &Entries,
) -> Result<Entries, MergeError> {
    for change in changes {
        if change.deleted {
            remote.remove(&change.key_path);
            continue;
        }
        let value = local
            .get(&change.key_path)
            .ok_or_else(|| MergeError::MissingKey(change.key_path.clone()))?;
        remote.insert(change.key_path.clone(), value.clone());
    }
    Ok(remote)
}
