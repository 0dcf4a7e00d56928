//! 채널 키별 구독 상태 머신.
//!
//! 상태 전이:
//! ```text
//! (없음) --subscribe 요청--> PendingSubscribe --ack 성공--> Subscribed
//!                            PendingSubscribe --ack 실패--> (없음)
//! Subscribed --unsubscribe 요청--> PendingUnsubscribe --ack 성공--> (없음)
//!                                  PendingUnsubscribe --ack 실패--> Subscribed
//! ```
//!
//! 대기 중인 키는 해당 키를 소유한 요청 id를 기록합니다. 확정/롤백은 소유 요청만
//! 수행할 수 있으므로, 재연결 복원이 키를 넘겨받은 뒤 늦게 도착한 이전 요청의
//! 결과가 상태를 덮어쓰지 않습니다.

use std::collections::BTreeMap;
use tokio::sync::watch;

/// 채널 키 구독 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// 추적 테이블에 없음
    Unsubscribed,
    PendingSubscribe,
    Subscribed,
    PendingUnsubscribe,
}

/// 대기 중인 요청이 정리(성공/실패)되면 `true`로 바뀌는 신호.
pub(crate) type Settled = watch::Receiver<bool>;

#[derive(Debug)]
struct Entry {
    state: SubscriptionState,
    owner: Option<u64>,
    settled: Option<Settled>,
}

/// 구독 요청 계획.
#[derive(Debug, Default)]
pub(crate) struct SubscribePlan {
    /// 이번 요청으로 전송할 키
    pub fresh: Vec<String>,
    /// 다른 요청이 진행 중이라 정리된 뒤 다시 시도할 키
    pub deferred: Vec<(String, Settled)>,
    /// 이미 구독된 키
    pub already: Vec<String>,
}

/// 구독 해제 요청 계획.
#[derive(Debug, Default)]
pub(crate) struct UnsubscribePlan {
    pub fresh: Vec<String>,
    pub deferred: Vec<(String, Settled)>,
    /// 추적되지 않는 키 (할 일 없음)
    pub absent: Vec<String>,
}

/// 채널 키 → 구독 상태 테이블. 재연결 후에도 유지됩니다.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    entries: BTreeMap<String, Entry>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 키의 현재 상태.
    pub fn state(&self, key: &str) -> SubscriptionState {
        self.entries
            .get(key)
            .map(|e| e.state)
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 지정한 상태의 키 목록.
    pub fn keys_in(&self, state: SubscriptionState) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == state)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// 재연결 시 다시 구독해야 할 키 (`PendingUnsubscribe`가 아닌 모든 키).
    pub fn restorable_keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state != SubscriptionState::PendingUnsubscribe)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// 구독 요청을 분류하고, 새 키를 `request_id` 소유의 `PendingSubscribe`로 표시.
    pub(crate) fn plan_subscribe(
        &mut self,
        keys: &[String],
        request_id: u64,
        settled: &Settled,
    ) -> SubscribePlan {
        let mut plan = SubscribePlan::default();

        for key in keys {
            match self.entries.get(key) {
                None => {
                    self.entries.insert(
                        key.clone(),
                        Entry {
                            state: SubscriptionState::PendingSubscribe,
                            owner: Some(request_id),
                            settled: Some(settled.clone()),
                        },
                    );
                    plan.fresh.push(key.clone());
                }
                Some(entry) if entry.state == SubscriptionState::Subscribed => {
                    plan.already.push(key.clone());
                }
                Some(entry) => match &entry.settled {
                    Some(rx) => plan.deferred.push((key.clone(), rx.clone())),
                    None => plan.already.push(key.clone()),
                },
            }
        }

        plan
    }

    /// 소유 요청의 성공 응답: `PendingSubscribe` → `Subscribed`.
    pub(crate) fn confirm_subscribe(&mut self, request_id: u64, keys: &[String]) {
        for key in keys {
            if let Some(entry) = self.owned_mut(key, request_id, SubscriptionState::PendingSubscribe) {
                entry.state = SubscriptionState::Subscribed;
                entry.owner = None;
                entry.settled = None;
            }
        }
    }

    /// 소유 요청의 실패: 키를 테이블에서 제거.
    pub(crate) fn fail_subscribe(&mut self, request_id: u64, keys: &[String]) {
        self.remove_owned(request_id, keys, SubscriptionState::PendingSubscribe);
    }

    /// 구독 해제 요청을 분류하고 `Subscribed` 키를 `PendingUnsubscribe`로 표시.
    pub(crate) fn plan_unsubscribe(
        &mut self,
        keys: &[String],
        request_id: u64,
        settled: &Settled,
    ) -> UnsubscribePlan {
        let mut plan = UnsubscribePlan::default();

        for key in keys {
            match self.entries.get_mut(key) {
                None => plan.absent.push(key.clone()),
                Some(entry) if entry.state == SubscriptionState::Subscribed => {
                    entry.state = SubscriptionState::PendingUnsubscribe;
                    entry.owner = Some(request_id);
                    entry.settled = Some(settled.clone());
                    plan.fresh.push(key.clone());
                }
                Some(entry) => match &entry.settled {
                    Some(rx) => plan.deferred.push((key.clone(), rx.clone())),
                    None => plan.absent.push(key.clone()),
                },
            }
        }

        plan
    }

    /// 소유 요청의 성공 응답: 키 제거.
    pub(crate) fn confirm_unsubscribe(&mut self, request_id: u64, keys: &[String]) {
        self.remove_owned(request_id, keys, SubscriptionState::PendingUnsubscribe);
    }

    /// 소유 요청의 실패: `PendingUnsubscribe` → `Subscribed`.
    pub(crate) fn fail_unsubscribe(&mut self, request_id: u64, keys: &[String]) {
        for key in keys {
            if let Some(entry) =
                self.owned_mut(key, request_id, SubscriptionState::PendingUnsubscribe)
            {
                entry.state = SubscriptionState::Subscribed;
                entry.owner = None;
                entry.settled = None;
            }
        }
    }

    /// 재연결 복원 요청이 키를 넘겨받음.
    pub(crate) fn mark_restoring(&mut self, keys: &[String], request_id: u64, settled: &Settled) {
        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                if entry.state != SubscriptionState::PendingUnsubscribe {
                    entry.state = SubscriptionState::PendingSubscribe;
                    entry.owner = Some(request_id);
                    entry.settled = Some(settled.clone());
                }
            }
        }
    }

    fn owned_mut(
        &mut self,
        key: &str,
        request_id: u64,
        state: SubscriptionState,
    ) -> Option<&mut Entry> {
        self.entries
            .get_mut(key)
            .filter(|e| e.state == state && e.owner == Some(request_id))
    }

    fn remove_owned(&mut self, request_id: u64, keys: &[String], state: SubscriptionState) {
        for key in keys {
            if self.owned_mut(key, request_id, state).is_some() {
                self.entries.remove(key);
            }
        }
    }
}
