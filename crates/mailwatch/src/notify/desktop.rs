use notify_rust::{Hint, Notification, Timeout};
use tracing::{debug, error};

use crate::config::AccountKey;
use crate::mail::MessageHeader;

use super::format::{error_notice, new_mail_notice, Notice};
use super::{NotificationSink, NotifyError};

const APP_NAME: &str = "mailwatch";

/// Sent by most notification servers when the body is clicked.
const ACTION_DEFAULT: &str = "default";
const ACTION_OPEN: &str = "open";

/// Shows notifications through the platform notification service.
///
/// Each notification is displayed on its own short-lived thread so a slow
/// notification daemon never blocks a polling loop. Where the server
/// supports actions, clicking a new-mail notification opens the account's
/// web link; the link is also part of the body text.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    timeout: Timeout,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            timeout: Timeout::Milliseconds(10_000),
        }
    }

    fn dispatch(&self, notice: Notice, icon: &'static str) -> Result<(), NotifyError> {
        let timeout = self.timeout;
        std::thread::Builder::new()
            .name("mailwatch-notify".to_string())
            .spawn(move || {
                let mut notification = Notification::new();
                notification
                    .appname(APP_NAME)
                    .summary(&notice.summary)
                    .body(&notice.body)
                    .icon(icon)
                    .hint(Hint::Category("email.arrived".to_string()))
                    .timeout(timeout);
                if notice.link.is_some() {
                    actions::offer_open(&mut notification);
                }

                match notification.show() {
                    Ok(handle) => {
                        if let Some(link) = notice.link {
                            actions::wait_for_open(handle, &link);
                        }
                    }
                    Err(e) => error!("Failed to show notification '{}': {}", notice.summary, e),
                }
            })?;
        Ok(())
    }
}

#[cfg_attr(not(all(unix, not(target_os = "macos"))), allow(dead_code))]
fn is_open_action(action: &str) -> bool {
    action == ACTION_DEFAULT || action == ACTION_OPEN
}

#[cfg_attr(not(all(unix, not(target_os = "macos"))), allow(dead_code))]
fn open_link(link: &str) {
    debug!("Opening {}", link);
    if let Err(e) = open::that(link) {
        error!("Failed to open {}: {}", link, e);
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
mod actions {
    use notify_rust::{Notification, NotificationHandle};

    use super::{is_open_action, open_link, ACTION_DEFAULT, ACTION_OPEN};

    pub(super) fn offer_open(notification: &mut Notification) {
        notification
            .action(ACTION_DEFAULT, "Open")
            .action(ACTION_OPEN, "Open mailbox");
    }

    /// Blocks until the notification is clicked or closed.
    pub(super) fn wait_for_open(handle: NotificationHandle, link: &str) {
        handle.wait_for_action(|action| {
            if is_open_action(action) {
                open_link(link);
            }
        });
    }
}

// no action callbacks here; the link stays in the body
#[cfg(not(all(unix, not(target_os = "macos"))))]
mod actions {
    use notify_rust::Notification;

    pub(super) fn offer_open(_notification: &mut Notification) {}

    pub(super) fn wait_for_open<H>(_handle: H, _link: &str) {}
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for DesktopNotifier {
    fn show_new_mail(
        &self,
        messages: &[MessageHeader],
        account: &AccountKey,
        web_link: Option<&str>,
        display_name: &str,
    ) -> Result<(), NotifyError> {
        let Some(notice) = new_mail_notice(messages, display_name, web_link) else {
            return Ok(());
        };
        debug!(account = %account, count = messages.len(), "Showing new mail notification");
        self.dispatch(notice, "mail-message-new")
    }

    fn show_error(&self, message: &str) -> Result<(), NotifyError> {
        self.dispatch(error_notice(message), "dialog-error")
    }
}
