//! Positional release roles
//!
//! Roles are derived from the Application history on every pass and never
//! stored on the Release:
//! - contender: the newest entry
//! - incumbent: the nearest older entry that achieved its own last step
//! - retired: every other older entry

use crate::crd::Release;
use kube::ResourceExt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoleError {
    #[error("release {release} is not in the history of application {application}")]
    NotInHistory {
        release: String,
        application: String,
    },

    #[error("contender release {0} of the application history does not exist")]
    ContenderMissing(String),
}

#[derive(Debug, Clone)]
pub enum Role {
    /// Newest release; `incumbent` is the release it is replacing, if any
    Contender { incumbent: Option<Release> },
    /// Fully rolled-out predecessor of `contender`
    Incumbent { contender: Release },
    /// Older release that is neither contender nor incumbent
    Retired { contender: Release },
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Contender { .. } => "contender",
            Role::Incumbent { .. } => "incumbent",
            Role::Retired { .. } => "retired",
        }
    }
}

fn find<'a>(siblings: &'a [Release], name: &str) -> Option<&'a Release> {
    siblings.iter().find(|r| r.name_any() == name)
}

/// Nearest release older than `position` that achieved its last step
fn incumbent_before<'a>(
    history: &[String],
    position: usize,
    siblings: &'a [Release],
) -> Option<&'a Release> {
    history[..position]
        .iter()
        .rev()
        .filter_map(|name| find(siblings, name))
        .find(|release| release.has_achieved_last_step())
}

/// Resolve the role of `release` within `history` (oldest first)
///
/// `siblings` are the Releases of the same Application; `release` itself
/// may or may not be among them.
pub fn resolve(
    release: &Release,
    application: &str,
    history: &[String],
    siblings: &[Release],
) -> Result<Role, RoleError> {
    let name = release.name_any();
    let position = history
        .iter()
        .position(|entry| *entry == name)
        .ok_or_else(|| RoleError::NotInHistory {
            release: name.clone(),
            application: application.to_string(),
        })?;
    let newest = history.len() - 1;

    if position == newest {
        let incumbent = incumbent_before(history, position, siblings).cloned();
        return Ok(Role::Contender { incumbent });
    }

    let contender_name = &history[newest];
    let contender = find(siblings, contender_name)
        .cloned()
        .ok_or_else(|| RoleError::ContenderMissing(contender_name.clone()))?;

    let is_incumbent = incumbent_before(history, newest, siblings)
        .is_some_and(|incumbent| incumbent.name_any() == name);

    if is_incumbent {
        Ok(Role::Incumbent { contender })
    } else {
        Ok(Role::Retired { contender })
    }
}
