//! 이름 있는 이벤트 리스너 레지스트리.
//!
//! 리스너는 등록 순서대로 호출되며, 한 리스너의 패닉은 다른 리스너나
//! 디스패치 루프에 전파되지 않습니다.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// 핸들 번호는 모든 emitter에 걸쳐 유일합니다.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// 등록된 리스너를 가리키는 핸들. [`Emitter::off`]로 해제합니다.
///
/// 다른 emitter에 넘기면 아무것도 해제하지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// 단일 이벤트 타입에 대한 리스너 목록.
pub struct Emitter<T> {
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Emitter<T> {
    /// 빈 emitter 생성.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Listener<T>)>> {
        // 리스너는 잠금 밖에서 실행되므로 poison은 무시해도 안전합니다
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 리스너 등록.
    pub fn on<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(listener)));
        ListenerHandle(id)
    }

    /// 리스너 해제. 이미 해제된 핸들이면 `false`.
    pub fn off(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != handle.0);
        listeners.len() != before
    }

    /// 등록된 리스너 수.
    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    /// 모든 리스너에게 이벤트 전달.
    ///
    /// 호출 시점의 리스너 목록 스냅샷을 사용하므로 리스너 안에서
    /// `on`/`off`를 호출해도 교착되지 않습니다.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = self.lock().iter().map(|(_, l)| l.clone()).collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("이벤트 리스너 패닉, 나머지 리스너는 계속 실행");
            }
        }
    }
}
