//! 会话存储 Actor
//!
//! Save / Load / List / Delete 四个操作全部经由 Actor 邮箱串行执行。
//! 后端：内存，或 JSON 文件（`<root>/<工作目录键>/<会话 id>.json`，父目录不存在时自动创建）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{spawn, Actor, ActorRef};
use crate::core::AgentError;
use crate::memory::Session;

/// 会话列表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub name: Option<String>,
    pub working_dir: PathBuf,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl SessionInfo {
    fn of(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            name: session.name.clone(),
            working_dir: session.working_dir.clone(),
            message_count: session.len(),
            updated_at: session.updated_at,
        }
    }
}

pub enum SessionStoreRequest {
    Save {
        session: Box<Session>,
        name: Option<String>,
    },
    Load {
        working_dir: PathBuf,
        id: String,
    },
    List {
        working_dir: PathBuf,
    },
    Delete {
        working_dir: PathBuf,
        id: String,
    },
}

pub enum SessionStoreResponse {
    Saved(SessionInfo),
    Loaded(Option<Box<Session>>),
    Listed(Vec<SessionInfo>),
    Deleted(bool),
    Failed(String),
}

enum Backend {
    Memory(HashMap<(PathBuf, String), Session>),
    Files { root: PathBuf },
}

/// 会话存储 Actor
pub struct SessionStoreActor {
    backend: Backend,
}

impl SessionStoreActor {
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(HashMap::new()),
        }
    }

    pub fn with_directory(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Files { root: root.into() },
        }
    }

    async fn save(&mut self, mut session: Session, name: Option<String>) -> Result<SessionInfo, String> {
        if name.is_some() {
            session.name = name;
        }
        let info = SessionInfo::of(&session);
        match &mut self.backend {
            Backend::Memory(map) => {
                map.insert((session.working_dir.clone(), session.id.clone()), session);
            }
            Backend::Files { root } => {
                let path = session_path(root, &session.working_dir, &session.id)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| format!("create {}: {e}", parent.display()))?;
                }
                let data = serde_json::to_vec_pretty(&session).map_err(|e| e.to_string())?;
                tokio::fs::write(&path, data)
                    .await
                    .map_err(|e| format!("write {}: {e}", path.display()))?;
            }
        }
        tracing::debug!(session_id = %info.id, messages = info.message_count, "session saved");
        Ok(info)
    }

    async fn load(&self, working_dir: &Path, id: &str) -> Result<Option<Session>, String> {
        match &self.backend {
            Backend::Memory(map) => Ok(map.get(&(working_dir.to_path_buf(), id.to_string())).cloned()),
            Backend::Files { root } => {
                let path = session_path(root, working_dir, id)?;
                let data = match tokio::fs::read(&path).await {
                    Ok(data) => data,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(format!("read {}: {e}", path.display())),
                };
                let session: Session = serde_json::from_slice(&data)
                    .map_err(|e| format!("parse {}: {e}", path.display()))?;
                // 工作目录键可能碰撞，以文件内记录的工作目录为准
                Ok((session.working_dir == working_dir).then_some(session))
            }
        }
    }

    async fn list(&self, working_dir: &Path) -> Result<Vec<SessionInfo>, String> {
        let mut infos = match &self.backend {
            Backend::Memory(map) => map
                .iter()
                .filter(|((dir, _), _)| dir == working_dir)
                .map(|(_, s)| SessionInfo::of(s))
                .collect::<Vec<_>>(),
            Backend::Files { root } => {
                let dir = root.join(working_dir_key(working_dir));
                let mut entries = match tokio::fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => return Err(format!("list {}: {e}", dir.display())),
                };
                let mut infos = Vec::new();
                while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let parsed = match tokio::fs::read(&path).await {
                        Ok(data) => serde_json::from_slice::<Session>(&data).map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    match parsed {
                        Ok(session) if session.working_dir == working_dir => {
                            infos.push(SessionInfo::of(&session))
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable session file"),
                    }
                }
                infos
            }
        };
        infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(infos)
    }

    async fn delete(&mut self, working_dir: &Path, id: &str) -> Result<bool, String> {
        match &mut self.backend {
            Backend::Memory(map) => Ok(map
                .remove(&(working_dir.to_path_buf(), id.to_string()))
                .is_some()),
            Backend::Files { root } => {
                let path = session_path(root, working_dir, id)?;
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(format!("delete {}: {e}", path.display())),
                }
            }
        }
    }
}

#[async_trait]
impl Actor for SessionStoreActor {
    type Request = SessionStoreRequest;
    type Response = SessionStoreResponse;

    fn name(&self) -> &'static str {
        "session_store"
    }

    async fn handle(&mut self, request: SessionStoreRequest) -> SessionStoreResponse {
        let result = match request {
            SessionStoreRequest::Save { session, name } => {
                self.save(*session, name).await.map(SessionStoreResponse::Saved)
            }
            SessionStoreRequest::Load { working_dir, id } => self
                .load(&working_dir, &id)
                .await
                .map(|s| SessionStoreResponse::Loaded(s.map(Box::new))),
            SessionStoreRequest::List { working_dir } => {
                self.list(&working_dir).await.map(SessionStoreResponse::Listed)
            }
            SessionStoreRequest::Delete { working_dir, id } => {
                self.delete(&working_dir, &id).await.map(SessionStoreResponse::Deleted)
            }
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "session store request failed");
            SessionStoreResponse::Failed(e)
        })
    }
}

/// 工作目录 -> 目录名：非字母数字替换为 '_'
fn working_dir_key(working_dir: &Path) -> String {
    let raw = working_dir.to_string_lossy();
    let key: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let key = key.trim_matches('_');
    if key.is_empty() {
        "root".to_string()
    } else {
        key.to_string()
    }
}

fn session_path(root: &Path, working_dir: &Path, id: &str) -> Result<PathBuf, String> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(format!("invalid session id: {id:?}"));
    }
    Ok(root
        .join(working_dir_key(working_dir))
        .join(format!("{id}.json")))
}

/// 会话存储的类型化引用
#[derive(Clone, Debug)]
pub struct SessionStoreHandle {
    actor: ActorRef<SessionStoreActor>,
}

impl SessionStoreHandle {
    pub fn spawn(actor: SessionStoreActor) -> Self {
        Self {
            actor: spawn(actor),
        }
    }

    pub async fn save(&self, session: &Session, name: Option<&str>) -> Result<SessionInfo, AgentError> {
        let request = SessionStoreRequest::Save {
            session: Box::new(session.clone()),
            name: name.map(str::to_string),
        };
        match self.actor.send(request).await? {
            SessionStoreResponse::Saved(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn load(&self, working_dir: &Path, id: &str) -> Result<Option<Session>, AgentError> {
        let request = SessionStoreRequest::Load {
            working_dir: working_dir.to_path_buf(),
            id: id.to_string(),
        };
        match self.actor.send(request).await? {
            SessionStoreResponse::Loaded(session) => Ok(session.map(|s| *s)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list(&self, working_dir: &Path) -> Result<Vec<SessionInfo>, AgentError> {
        let request = SessionStoreRequest::List {
            working_dir: working_dir.to_path_buf(),
        };
        match self.actor.send(request).await? {
            SessionStoreResponse::Listed(infos) => Ok(infos),
            other => Err(unexpected(other)),
        }
    }

    pub async fn delete(&self, working_dir: &Path, id: &str) -> Result<bool, AgentError> {
        let request = SessionStoreRequest::Delete {
            working_dir: working_dir.to_path_buf(),
            id: id.to_string(),
        };
        match self.actor.send(request).await? {
            SessionStoreResponse::Deleted(deleted) => Ok(deleted),
            other => Err(unexpected(other)),
        }
    }

    pub async fn close(&self) -> Result<(), AgentError> {
        Ok(self.actor.close().await?)
    }
}

fn unexpected(response: SessionStoreResponse) -> AgentError {
    match response {
        SessionStoreResponse::Failed(e) => AgentError::Storage(e),
        _ => AgentError::Storage("unexpected session store response".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    fn sample_session(dir: &str) -> Session {
        let mut session = Session::new(dir);
        session.push(Message::user("refactor the parser")).unwrap();
        session.push(Message::assistant("done")).unwrap();
        session
    }

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let store = SessionStoreHandle::spawn(SessionStoreActor::in_memory());
        let session = sample_session("/work/a");
        let info = store.save(&session, Some("parser")).await.unwrap();
        assert_eq!(info.name.as_deref(), Some("parser"));
        assert_eq!(info.message_count, 2);

        let loaded = store
            .load(Path::new("/work/a"), &session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.messages(), session.messages());
        assert!(store
            .load(Path::new("/work/b"), &session.id)
            .await
            .unwrap()
            .is_none());

        assert_eq!(store.list(Path::new("/work/a")).await.unwrap().len(), 1);
        assert!(store.delete(Path::new("/work/a"), &session.id).await.unwrap());
        assert!(!store.delete(Path::new("/work/a"), &session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_backend_persists_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStoreHandle::spawn(SessionStoreActor::with_directory(dir.path()));
        let first = sample_session("/work/project");
        let second = sample_session("/work/project");
        let other = sample_session("/work/other");
        store.save(&first, None).await.unwrap();
        store.save(&second, None).await.unwrap();
        store.save(&other, None).await.unwrap();

        let listed = store.list(Path::new("/work/project")).await.unwrap();
        assert_eq!(listed.len(), 2);

        let loaded = store
            .load(Path::new("/work/project"), &first.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, first.id);
        assert_eq!(loaded.len(), 2);

        assert!(store.delete(Path::new("/work/project"), &first.id).await.unwrap());
        assert_eq!(store.list(Path::new("/work/project")).await.unwrap().len(), 1);
        assert!(store.list(Path::new("/nowhere")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStoreHandle::spawn(SessionStoreActor::with_directory(dir.path()));
        let err = store
            .load(Path::new("/work"), "../../etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Storage(_)));
    }

    #[test]
    fn test_working_dir_key() {
        assert_eq!(working_dir_key(Path::new("/home/me/my project")), "home_me_my_project");
        assert_eq!(working_dir_key(Path::new("/")), "root");
    }
}
