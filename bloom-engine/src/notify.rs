//! Notification fan-out for newly unlocked achievements.
//!
//! The engine only reports unlocks. Callers turn them into
//! [`AchievementNotification`]s and publish them through a
//! [`NotificationHub`]; whatever renders toasts (a websocket bridge, a
//! desktop client) subscribes to the hub.

use bloom_catalog::Catalog;
use bloom_core::{RuleId, SubjectKind, SubjectSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::engine::Unlocked;

/// A one-shot "achievement unlocked" message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementNotification {
    /// UUIDv7, so notifications sort by creation time.
    pub id: Uuid,
    pub kind: SubjectKind,
    pub subject_id: String,
    pub title: String,
    pub subtitle: String,
    pub rule_id: RuleId,
    pub category: String,
    pub category_label: String,
    pub icon: String,
    pub name: String,
    pub description: String,
    pub unlocked_at: DateTime<Utc>,
}

impl AchievementNotification {
    pub fn from_unlocked(catalog: &Catalog, unlocked: &Unlocked) -> Self {
        let rule = &unlocked.rule;
        let kind = unlocked.kind();

        Self {
            id: Uuid::now_v7(),
            kind,
            subject_id: unlocked.subject_id().to_string(),
            title: title_for(kind).to_string(),
            subtitle: subtitle_for(&unlocked.subject),
            rule_id: rule.id.clone(),
            category: rule.category.clone(),
            category_label: catalog
                .category_label(&rule.category)
                .unwrap_or(&rule.category)
                .to_string(),
            icon: rule.icon.clone(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            unlocked_at: Utc::now(),
        }
    }
}

fn title_for(kind: SubjectKind) -> &'static str {
    match kind {
        SubjectKind::Individual => "🌸 花朵成就解锁！",
        SubjectKind::Group => "🌿 花田成就解锁！",
        SubjectKind::Aggregate => "🏆 班级成就解锁！",
    }
}

fn subtitle_for(subject: &SubjectSnapshot) -> String {
    match (subject.display_name(), subject.score()) {
        (Some(name), Some(score)) => format!("{} - {}分", name, score),
        _ => "班级荣誉".to_string(),
    }
}

/// Broadcast channel for achievement notifications.
///
/// Publishing never blocks. With no subscribers the notification is dropped;
/// a subscriber that falls more than `capacity` messages behind lags.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<AchievementNotification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send one notification, returning how many subscribers received it.
    pub fn publish(&self, notification: AchievementNotification) -> usize {
        let rule_id = notification.rule_id.clone();
        match self.tx.send(notification) {
            Ok(receivers) => {
                debug!(rule_id = %rule_id, receivers, "Published achievement notification");
                receivers
            }
            Err(_) => {
                debug!(rule_id = %rule_id, "No subscribers for achievement notification");
                0
            }
        }
    }

    /// Publish a notification for each unlock, in order. Returns the number
    /// of notifications built.
    pub fn dispatch(&self, catalog: &Catalog, unlocked: &[Unlocked]) -> usize {
        for u in unlocked {
            self.publish(AchievementNotification::from_unlocked(catalog, u));
        }
        unlocked.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AchievementNotification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bloom_core::{AggregateSnapshot, CatalogVersion, GroupSnapshot, IndividualSnapshot};

    fn catalog() -> std::sync::Arc<Catalog> {
        Catalog::builtin(CatalogVersion::Extended).unwrap()
    }

    fn unlocked(kind: SubjectKind, rule_id: &str, subject: SubjectSnapshot) -> Unlocked {
        Unlocked {
            rule: catalog().rule(kind, rule_id).unwrap().clone(),
            subject,
        }
    }

    #[test]
    fn test_individual_notification_text() {
        let u = unlocked(
            SubjectKind::Individual,
            "individual.basic.first_point",
            IndividualSnapshot::new("3", "小明", 1).into(),
        );
        let n = AchievementNotification::from_unlocked(&catalog(), &u);

        assert_eq!(n.title, "🌸 花朵成就解锁！");
        assert_eq!(n.subtitle, "小明 - 1分");
        assert_eq!(n.name, "初露锋芒");
        assert_eq!(n.description, "获得第一分");
        assert_eq!(n.category_label, "🌱 基础成就");
        assert_eq!(n.subject_id, "3");
        assert_eq!(n.id.get_version_num(), 7);
    }

    #[test]
    fn test_group_and_aggregate_titles() {
        let g = unlocked(
            SubjectKind::Group,
            "group.basic.founded",
            GroupSnapshot::new("g", "蒲公英队", 2).into(),
        );
        let n = AchievementNotification::from_unlocked(&catalog(), &g);
        assert_eq!(n.title, "🌿 花田成就解锁！");
        assert_eq!(n.subtitle, "蒲公英队 - 2分");

        let c = unlocked(
            SubjectKind::Aggregate,
            "aggregate.totalscore.bronze",
            AggregateSnapshot {
                scope_id: "c".to_string(),
                total_individuals: 1,
                total_groups: 0,
                total_score: 300,
                average_score: 300.0,
                high_score_count: 1,
            }
            .into(),
        );
        let n = AchievementNotification::from_unlocked(&catalog(), &c);
        assert_eq!(n.title, "🏆 班级成就解锁！");
        assert_eq!(n.subtitle, "班级荣誉");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let hub = NotificationHub::new(4);
        let u = unlocked(
            SubjectKind::Individual,
            "individual.basic.first_point",
            IndividualSnapshot::new("3", "小明", 1).into(),
        );
        assert_eq!(hub.dispatch(&catalog(), &[u]), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let hub = NotificationHub::new(8);
        let mut rx = hub.subscribe();

        let subject: SubjectSnapshot = IndividualSnapshot::new("3", "小明", 3).into();
        let batch = vec![
            unlocked(SubjectKind::Individual, "individual.basic.first_point", subject.clone()),
            unlocked(SubjectKind::Individual, "individual.basic.sprout", subject),
        ];
        hub.dispatch(&catalog(), &batch);

        assert_eq!(rx.recv().await.unwrap().name, "初露锋芒");
        assert_eq!(rx.recv().await.unwrap().name, "小苗成长");
    }

    #[test]
    fn test_notification_serializes() {
        let u = unlocked(
            SubjectKind::Group,
            "group.basic.founded",
            GroupSnapshot::new("g", "G", 1).into(),
        );
        let n = AchievementNotification::from_unlocked(&catalog(), &u);
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["kind"], "group");
        assert_eq!(value["rule_id"], "group.basic.founded");
    }
}
