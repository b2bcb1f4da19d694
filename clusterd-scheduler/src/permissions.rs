//! Task access control hook

use clusterd_ipc::AuthUser;

/// Group whose members may act on any task
pub const DEFAULT_PRIVILEGED_GROUP: &str = "wheel";

/// What a caller wants to do with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPermission {
    View,
    Kill,
}

/// Pluggable permission policy for task access
pub trait PermissionsChecker: Send + Sync {
    /// May `user` perform `permission` on a task submitted by `owner`?
    fn is_authorized(&self, user: &AuthUser, owner: &AuthUser, permission: TaskPermission) -> bool;
}

/// Default policy: the submitter, or any member of a privileged group
pub struct GroupPermissionsChecker {
    privileged_groups: Vec<String>,
}

impl GroupPermissionsChecker {
    pub fn new(privileged_groups: Vec<String>) -> Self {
        Self { privileged_groups }
    }
}

impl Default for GroupPermissionsChecker {
    fn default() -> Self {
        Self::new(vec![DEFAULT_PRIVILEGED_GROUP.to_string()])
    }
}

impl PermissionsChecker for GroupPermissionsChecker {
    fn is_authorized(&self, user: &AuthUser, owner: &AuthUser, _permission: TaskPermission) -> bool {
        user.username == owner.username
            || user
                .groups
                .iter()
                .any(|group| self.privileged_groups.contains(group))
    }
}
