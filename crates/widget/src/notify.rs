/// Outbound staff paging for deposit escalations.
///
/// Paging is fire-and-forget from the conversation's point of view: the
/// session never waits on delivery and delivery problems never produce
/// visitor-facing messages.
pub trait StaffNotifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that writes pages to the log, for development and QA runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStaffNotifier;

impl StaffNotifier for LogStaffNotifier {
    fn notify(&self, message: &str) {
        tracing::info!(alert = %message, "staff paged");
    }
}

/// Fixed alert text sent to the staff channel on a deposit escalation.
pub fn deposit_support_alert(visitor_name: &str) -> String {
    format!("{visitor_name} needs deposit support")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_names_the_visitor() {
        assert_eq!(
            deposit_support_alert("Amina"),
            "Amina needs deposit support"
        );
    }
}
