use serde::Serialize;
use tokio::sync::broadcast;

use super::state::SessionSnapshot;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged(SessionSnapshot),
    /// Уведомление, которое нужно показать пользователю
    Notice(String),
    /// Ошибка фоновой части сессии; состояние уже сброшено
    Failed { error: String },
    /// Удалённая сторона завершила сессию
    Disconnected { reason: String },
    /// Второй входящий звонок при активном соединении
    CallRejected { connection_id: String, remote: String },
}

pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}
