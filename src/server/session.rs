//! HTTP 会话
//!
//! [`HttpSession`] 是会话数据的共享句柄：克隆即增加引用计数，
//! 最后一个句柄释放时会话数据随之销毁。每个操作只在自身执行期间持有读写锁。

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

/// 会话数据
#[derive(Debug)]
struct SessionData {
    id: String,
    values: HashMap<String, Value>,
    last_access: Instant,
}

/// 会话句柄
#[derive(Debug, Clone, Default)]
pub struct HttpSession {
    data: Option<Arc<RwLock<SessionData>>>,
}

/// 生成会话 ID：UUID v4（操作系统随机源），32 位十六进制
fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl HttpSession {
    /// `can_persist` 为 false 时得到空会话，所有操作均无效果
    pub fn new(can_persist: bool) -> Self {
        if !can_persist {
            return Self::null();
        }
        let data = SessionData {
            id: generate_session_id(),
            values: HashMap::new(),
            last_access: Instant::now(),
        };
        Self {
            data: Some(Arc::new(RwLock::new(data))),
        }
    }

    /// 空会话
    pub fn null() -> Self {
        Self { data: None }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    fn read(&self) -> Option<RwLockReadGuard<'_, SessionData>> {
        // 持锁线程 panic 不会留下半更新的数据，直接接管
        self.data
            .as_ref()
            .map(|data| data.read().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn write(&self) -> Option<RwLockWriteGuard<'_, SessionData>> {
        self.data
            .as_ref()
            .map(|data| data.write().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// 会话 ID，空会话返回空字符串
    pub fn get_id(&self) -> String {
        self.read().map(|data| data.id.clone()).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().and_then(|data| data.values.get(key).cloned())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(mut data) = self.write() {
            data.values.insert(key.into(), value.into());
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().and_then(|mut data| data.values.remove(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().map(|data| data.values.contains_key(key)).unwrap_or(false)
    }

    /// 所有键值的快照
    pub fn get_all(&self) -> HashMap<String, Value> {
        self.read().map(|data| data.values.clone()).unwrap_or_default()
    }

    pub fn get_last_access(&self) -> Option<Instant> {
        self.read().map(|data| data.last_access)
    }

    /// 将最后访问时间设为当前时间
    pub fn set_last_access(&self) {
        if let Some(mut data) = self.write() {
            data.last_access = Instant::now();
        }
    }

    /// 当前共享同一会话数据的句柄数，空会话为 0
    pub fn handle_count(&self) -> usize {
        self.data.as_ref().map(Arc::strong_count).unwrap_or(0)
    }
}

impl PartialEq for HttpSession {
    fn eq(&self, other: &Self) -> bool {
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || self.get_id() == other.get_id(),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for HttpSession {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_null_session_is_inert() {
        let session = HttpSession::new(false);
        assert!(session.is_null());
        session.set("a", 1);
        assert!(!session.contains("a"));
        assert_eq!(session.get("a"), None);
        assert_eq!(session.get_id(), "");
        assert!(session.get_all().is_empty());
        assert!(session.get_last_access().is_none());
        assert_eq!(session.handle_count(), 0);
    }

    #[test]
    fn test_values() {
        let session = HttpSession::new(true);
        session.set("user", "alice");
        session.set("count", 3);
        session.set("prefs", json!({"theme": "dark"}));
        assert_eq!(session.get("user"), Some(json!("alice")));
        assert!(session.contains("count"));
        assert_eq!(session.get_all().len(), 3);
        assert_eq!(session.remove("count"), Some(json!(3)));
        assert!(!session.contains("count"));
    }

    #[test]
    fn test_ids_are_distinct() {
        let ids: HashSet<String> = (0..1000).map(|_| HttpSession::new(true).get_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.len() == 32));
    }

    #[test]
    fn test_clone_shares_data() {
        let original = HttpSession::new(true);
        original.set("k", "v");
        let copy = original.clone();
        assert_eq!(copy.handle_count(), 2);
        assert_eq!(copy, original);

        drop(original);
        assert_eq!(copy.handle_count(), 1);
        assert_eq!(copy.get("k"), Some(json!("v")));
    }

    #[test]
    fn test_last_handle_frees_data() {
        let session = HttpSession::new(true);
        let weak = Arc::downgrade(session.data.as_ref().unwrap());
        let copy = session.clone();
        drop(session);
        assert!(weak.upgrade().is_some());
        drop(copy);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_last_access_moves_forward() {
        let session = HttpSession::new(true);
        let before = session.get_last_access().unwrap();
        thread::sleep(std::time::Duration::from_millis(5));
        session.set_last_access();
        assert!(session.get_last_access().unwrap() > before);
    }

    #[test]
    fn test_concurrent_writers() {
        let session = HttpSession::new(true);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let session = session.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        session.set(format!("{}-{}", i, j), j);
                        let _ = session.get_all();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(session.get_all().len(), 800);
        assert_eq!(session.handle_count(), 1);
    }
}
