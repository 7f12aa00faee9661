//! Ownership, visibility and scope rules shared by every paste operation.
//!
//! Everything here is a pure function of the actor and the paste metadata, so
//! the lifecycle manager can ask the same questions before and after a fetch.

use crate::{Scope, StoredPaste};

use super::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Actor {
    #[default]
    Anonymous,
    User {
        user_id: String,
        scopes: Vec<Scope>,
    },
}

impl Actor {
    pub fn user(user_id: impl Into<String>, scopes: impl IntoIterator<Item = Scope>) -> Self {
        Actor::User {
            user_id: user_id.into(),
            scopes: scopes.into_iter().collect(),
        }
    }

    /// A user holding every scope, as a first-party session would.
    pub fn with_all_scopes(user_id: impl Into<String>) -> Self {
        Self::user(user_id, Scope::ALL)
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self, Actor::User { .. })
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Actor::Anonymous => None,
            Actor::User { user_id, .. } => Some(user_id),
        }
    }

    /// True when the actor holds at least one of `any_of`.
    pub fn has_scope(&self, any_of: &[Scope]) -> bool {
        match self {
            Actor::Anonymous => false,
            Actor::User { scopes, .. } => any_of.iter().any(|s| scopes.contains(s)),
        }
    }

    pub fn owns(&self, owner_id: Option<&str>) -> bool {
        matches!((self.user_id(), owner_id), (Some(me), Some(owner)) if me == owner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Delete,
    ToggleStar,
    TogglePinned,
    TogglePrivate,
    EditTags,
    Edit,
}

impl Operation {
    /// Scopes accepted for the operation; holding any one of them is enough.
    pub fn required_scopes(&self) -> &'static [Scope] {
        match self {
            Operation::Read => &[],
            Operation::ToggleStar | Operation::TogglePinned => &[Scope::User],
            Operation::Delete
            | Operation::TogglePrivate
            | Operation::EditTags
            | Operation::Edit => &[Scope::Paste],
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Operation::Read => "read pastes",
            Operation::Delete => "delete pastes",
            Operation::ToggleStar => "star pastes",
            Operation::TogglePinned => "pin/unpin pastes",
            Operation::TogglePrivate => "change the private status of pastes",
            Operation::EditTags => "edit tags",
            Operation::Edit => "edit pastes",
        }
    }

    fn requires_owner(&self) -> bool {
        !matches!(self, Operation::Read | Operation::ToggleStar)
    }
}

/// Requested flags of a paste about to be created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateFlags {
    pub anonymous: bool,
    pub private: bool,
    pub pinned: bool,
    pub tagged: bool,
}

/// The metadata the evaluator needs; never the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasteAttributes<'a> {
    pub owner_id: Option<&'a str>,
    pub private: bool,
    pub pinned: bool,
}

impl<'a> From<&'a StoredPaste> for PasteAttributes<'a> {
    fn from(paste: &'a StoredPaste) -> Self {
        Self {
            owner_id: paste.owner_id.as_deref(),
            private: paste.private,
            pinned: paste.pinned,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    /// Existence is hidden from the caller.
    NotFound,
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    pub fn into_result(self) -> ServiceResult<()> {
        match self {
            AccessDecision::Allow => Ok(()),
            AccessDecision::NotFound => Err(ServiceError::paste_not_found()),
            AccessDecision::Unauthorized(msg) => Err(ServiceError::Unauthorized(msg)),
            AccessDecision::Forbidden(msg) => Err(ServiceError::Forbidden(msg)),
            AccessDecision::BadRequest(msg) => Err(ServiceError::BadRequest(msg)),
        }
    }

    fn then(self, next: impl FnOnce() -> AccessDecision) -> AccessDecision {
        match self {
            AccessDecision::Allow => next(),
            denied => denied,
        }
    }
}

fn missing_scope(scope: Scope) -> AccessDecision {
    AccessDecision::Forbidden(format!("Missing required scope {scope}."))
}

pub fn evaluate_create(actor: &Actor, flags: CreateFlags) -> AccessDecision {
    let logged_in = actor.is_logged_in();

    if flags.pinned {
        if !logged_in {
            return AccessDecision::Unauthorized(
                "Can't create a pinned paste while unauthorized.".into(),
            );
        }
        if flags.private || flags.anonymous {
            return AccessDecision::BadRequest(
                "Can't create a private or anonymous pinned paste.".into(),
            );
        }
    }

    if flags.private {
        if !logged_in {
            return AccessDecision::Unauthorized(
                "Can't create a private paste while unauthorized.".into(),
            );
        }
        if flags.anonymous {
            return AccessDecision::BadRequest("Can't create a private anonymous paste.".into());
        }
    }

    if flags.tagged {
        if !logged_in {
            return AccessDecision::Unauthorized(
                "Can't create a tagged paste while unauthorized.".into(),
            );
        }
        if flags.anonymous {
            return AccessDecision::BadRequest("Can't create a tagged anonymous paste.".into());
        }
    }

    if logged_in && !flags.anonymous && !actor.has_scope(&[Scope::Paste]) {
        return missing_scope(Scope::Paste);
    }

    AccessDecision::Allow
}

/// Checks that need no paste at all. Run before fetching so a missing session
/// is reported the same way whether or not the id exists.
pub fn authorize_session(actor: &Actor, op: Operation) -> AccessDecision {
    if op == Operation::Read {
        return AccessDecision::Allow;
    }
    if !actor.is_logged_in() {
        return AccessDecision::Unauthorized(format!(
            "You must be authorized to {}.",
            op.describe()
        ));
    }
    let required = op.required_scopes();
    match required.first() {
        Some(first) if !actor.has_scope(required) => missing_scope(*first),
        _ => AccessDecision::Allow,
    }
}

/// Private pastes are visible only to their owner holding a paste-reading scope.
pub fn can_view(actor: &Actor, paste: PasteAttributes<'_>) -> bool {
    !paste.private
        || (actor.owns(paste.owner_id) && actor.has_scope(&[Scope::Paste, Scope::PasteRead]))
}

pub fn can_view_tags(actor: &Actor, paste: PasteAttributes<'_>) -> bool {
    actor.owns(paste.owner_id)
}

/// Full decision for `op` on an existing paste.
pub fn evaluate(actor: &Actor, paste: PasteAttributes<'_>, op: Operation) -> AccessDecision {
    authorize_session(actor, op)
        .then(|| {
            if can_view(actor, paste) {
                AccessDecision::Allow
            } else {
                AccessDecision::NotFound
            }
        })
        .then(|| {
            if !op.requires_owner() || actor.owns(paste.owner_id) {
                return AccessDecision::Allow;
            }
            if paste.private {
                AccessDecision::NotFound
            } else {
                AccessDecision::Unauthorized(format!("You can only {} you own.", op.describe()))
            }
        })
        .then(|| match op {
            Operation::TogglePinned if paste.private => {
                AccessDecision::BadRequest("You can't pin private pastes.".into())
            }
            Operation::TogglePrivate if paste.pinned => {
                AccessDecision::BadRequest("You can't private pinned pastes.".into())
            }
            _ => AccessDecision::Allow,
        })
}
