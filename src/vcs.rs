use git2::Repository;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Branch and commit of the repository containing a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsState {
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// Read HEAD for the repository enclosing `root`. Missing repositories and
/// unborn branches yield empty fields rather than errors.
pub fn read_head(root: &Path) -> VcsState {
    let Ok(repo) = Repository::discover(root) else {
        return VcsState::default();
    };
    let Ok(head) = repo.head() else {
        return VcsState {
            branch: unborn_branch(&repo),
            commit: None,
        };
    };

    let branch = if head.is_branch() {
        head.shorthand().map(str::to_string)
    } else {
        Some("HEAD".to_string())
    };
    let commit = head
        .peel_to_commit()
        .ok()
        .map(|c| c.id().to_string().chars().take(7).collect());

    VcsState { branch, commit }
}

/// Branch name HEAD points at before the first commit exists.
fn unborn_branch(repo: &Repository) -> Option<String> {
    let head = repo.find_reference("HEAD").ok()?;
    head.symbolic_target()
        .map(|target| target.trim_start_matches("refs/heads/").to_string())
}

/// `user.name` from the user's global git configuration.
pub fn git_user_name() -> Option<String> {
    git2::Config::open_default()
        .ok()?
        .get_string("user.name")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}
