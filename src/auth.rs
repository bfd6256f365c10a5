//! Authentication handshake state machine.

use serde::Serialize;

/// Coarse position in the handshake, used for ordering checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStage {
    None,
    NeedsAuth,
    AwaitingCode,
    Authenticated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    None,
    NeedsAuth,
    AwaitingCode {
        code: String,
        auth_url: String,
    },
    Authenticated {
        profile_name: Option<String>,
        /// Credentials live in server memory only and are lost on restart.
        needs_persistence: bool,
    },
}

impl AuthStatus {
    pub fn stage(&self) -> AuthStage {
        match self {
            Self::None => AuthStage::None,
            Self::NeedsAuth => AuthStage::NeedsAuth,
            Self::AwaitingCode { .. } => AuthStage::AwaitingCode,
            Self::Authenticated { .. } => AuthStage::Authenticated,
        }
    }

    pub fn needs_persistence(&self) -> bool {
        matches!(
            self,
            Self::Authenticated {
                needs_persistence: true,
                ..
            }
        )
    }

    pub fn profile_name(&self) -> Option<&str> {
        match self {
            Self::Authenticated { profile_name, .. } => profile_name.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthInput {
    Needed,
    CodeReady { code: String, auth_url: String },
    Succeeded { profile_name: Option<String> },
    NeedsPersistence,
    PersistenceSaved,
    /// Run status reached `stopped`.
    Reset,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub status: AuthStatus,
    /// A needs-persistence notice that arrived before authentication finished.
    #[serde(skip)]
    pending_persistence: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub state: AuthState,
    /// Stages entered, in order, including implied ones.
    pub path: Vec<AuthStage>,
    /// The persistence flag flipped.
    pub persistence_changed: bool,
}

impl AuthOutcome {
    pub fn changed(&self) -> bool {
        !self.path.is_empty() || self.persistence_changed
    }

    pub fn authenticated_now(&self) -> bool {
        self.path.last() == Some(&AuthStage::Authenticated)
    }
}

impl AuthState {
    pub fn stage(&self) -> AuthStage {
        self.status.stage()
    }
}

/// Stages strictly between `from` and `to`, followed by `to`.
fn walk(from: AuthStage, to: AuthStage) -> Vec<AuthStage> {
    [
        AuthStage::NeedsAuth,
        AuthStage::AwaitingCode,
        AuthStage::Authenticated,
    ]
    .into_iter()
    .filter(|stage| *stage > from && *stage <= to)
    .collect()
}

pub fn reduce(current: &AuthState, input: AuthInput) -> AuthOutcome {
    let stage = current.stage();
    let mut next = current.clone();
    let mut path = Vec::new();
    let mut persistence_changed = false;

    match input {
        AuthInput::Reset => {
            if stage != AuthStage::None {
                path.push(AuthStage::None);
            }
            next = AuthState::default();
        }
        AuthInput::Needed => {
            if stage == AuthStage::None {
                path = walk(stage, AuthStage::NeedsAuth);
                next.status = AuthStatus::NeedsAuth;
            }
        }
        AuthInput::CodeReady { code, auth_url } => match &current.status {
            AuthStatus::None | AuthStatus::NeedsAuth => {
                path = walk(stage, AuthStage::AwaitingCode);
                next.status = AuthStatus::AwaitingCode { code, auth_url };
            }
            AuthStatus::AwaitingCode {
                code: old_code,
                auth_url: old_url,
            } => {
                // A refreshed device code replaces the previous one in place.
                if *old_code != code || *old_url != auth_url {
                    path.push(AuthStage::AwaitingCode);
                    next.status = AuthStatus::AwaitingCode { code, auth_url };
                }
            }
            AuthStatus::Authenticated { .. } => {}
        },
        AuthInput::Succeeded { profile_name } => match &current.status {
            AuthStatus::Authenticated {
                profile_name: old_name,
                needs_persistence,
            } => {
                if profile_name.is_some() && *old_name != profile_name {
                    next.status = AuthStatus::Authenticated {
                        profile_name,
                        needs_persistence: *needs_persistence,
                    };
                    path.push(AuthStage::Authenticated);
                }
            }
            _ => {
                path = walk(stage, AuthStage::Authenticated);
                next.status = AuthStatus::Authenticated {
                    profile_name,
                    needs_persistence: current.pending_persistence,
                };
                next.pending_persistence = false;
                persistence_changed = current.pending_persistence;
            }
        },
        AuthInput::NeedsPersistence => match &mut next.status {
            AuthStatus::Authenticated {
                needs_persistence, ..
            } => {
                if !*needs_persistence {
                    *needs_persistence = true;
                    persistence_changed = true;
                }
            }
            _ => next.pending_persistence = true,
        },
        AuthInput::PersistenceSaved => {
            next.pending_persistence = false;
            if let AuthStatus::Authenticated {
                needs_persistence, ..
            } = &mut next.status
            {
                if *needs_persistence {
                    *needs_persistence = false;
                    persistence_changed = true;
                }
            }
        }
    }

    AuthOutcome {
        state: next,
        path,
        persistence_changed,
    }
}
