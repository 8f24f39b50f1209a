//! Shared-memory object naming

/// Longest object name accepted by `shm_open`, leading slash included
const NAME_MAX: usize = 255;

/// Turn a configured buffer name into a POSIX shared-memory object name
///
/// The result always carries exactly one leading `/`. Empty names and names
/// with an inner `/` cannot name a shared-memory object and yield `None`.
pub fn shm_object_name(name: &str) -> Option<String> {
    let bare = name.strip_prefix('/').unwrap_or(name);
    if bare.is_empty() || bare.contains('/') || bare.contains('\0') || bare.len() + 1 > NAME_MAX {
        return None;
    }
    Some(format!("/{bare}"))
}
