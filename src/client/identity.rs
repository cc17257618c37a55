use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use uuid::Uuid;

use crate::dto::{
    restore::{RestorationRequest, RestoreIdentity},
    ws::ClientMessage,
};

/// Failure to read or write the identity file.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// What a client remembers about the game it is part of, so it can be restored after a reload
/// or a dropped link.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub game_id: Option<Uuid>,
    pub game_code: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_host: bool,
    /// Host identity given in `createGame`.
    pub host_id: Option<String>,
    pub question_set_id: Option<String>,
    pub player_id: Option<Uuid>,
    pub user_id: Option<String>,
}

impl SessionIdentity {
    /// Restoration request matching the role of this identity.
    pub fn restoration_message(&self) -> ClientMessage {
        let request = RestorationRequest {
            game_code: self.game_code.clone(),
            identity: RestoreIdentity {
                player_id: self.player_id,
                player_name: self.display_name.clone(),
                host_id: self.host_id.clone(),
                user_id: self.user_id.clone(),
            },
        };
        if self.is_host {
            ClientMessage::RequestHostRestoration(request)
        } else {
            ClientMessage::RequestPlayerRestoration(request)
        }
    }
}

/// JSON key/value file holding the current [`SessionIdentity`].
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Store backed by `path`; the file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved identity, `None` when nothing was saved.
    pub fn load(&self) -> Result<Option<SessionIdentity>, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the saved identity.
    pub fn save(&self, identity: &SessionIdentity) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(identity)?)?;
        Ok(())
    }

    /// Forget the saved identity.
    pub fn clear(&self) -> Result<(), IdentityError> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
