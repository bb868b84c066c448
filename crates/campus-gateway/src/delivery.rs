use campus_scheduler::FiredNotification;
use tokio::sync::mpsc;
use tracing::info;

/// Drain fired notifications until every sender is gone.
///
/// Rendering and sending the actual message belongs to the notification
/// service downstream; this loop is where it plugs in.
pub async fn run(mut fired_rx: mpsc::Receiver<FiredNotification>) -> usize {
    let mut delivered = 0;
    while let Some(fired) = fired_rx.recv().await {
        info!(
            schedule_id = %fired.schedule_id,
            kind = %fired.notification_kind,
            fired_at = %fired.fired_at.to_rfc3339(),
            "notification fired"
        );
        delivered += 1;
    }
    info!(delivered, "delivery loop stopped");
    delivered
}
