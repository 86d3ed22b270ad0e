//! Desktop notification sinks for authentication alerts
//!
//! Uses native toast notifications where available. Platform quirk: toasts
//! cannot be programmatically dismissed on every platform, so `dismiss`
//! posts a short recovery toast instead where needed.

use tracing::{info, warn};

use crate::coordinator::Notifier;

/// Notifier backed by the platform's desktop notification service.
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str, tag: &str) {
        #[cfg(not(windows))]
        {
            use notify_rust::Notification;

            let result = Notification::new()
                .appname("fritz-vpn")
                .summary(title)
                .body(message)
                .show();
            if let Err(err) = result {
                warn!("Failed to show notification '{}': {}", tag, err);
            }
        }

        #[cfg(windows)]
        {
            use tauri_winrt_notification::Toast;

            let result = Toast::new(Toast::POWERSHELL_APP_ID)
                .title(title)
                .text1(message)
                .show();
            if let Err(err) = result {
                warn!("Failed to show notification '{}': {}", tag, err);
            }
        }
    }

    fn dismiss(&self, tag: &str) {
        info!("Alert '{}' cleared", tag);
        self.notify("FritzBox VPN", "Authentication recovered.", tag);
    }
}

/// Fallback sink that only writes to the log. Used by one-shot commands
/// where a desktop toast would be noise.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str, _tag: &str) {
        warn!("{}: {}", title, message);
    }

    fn dismiss(&self, tag: &str) {
        info!("Alert '{}' cleared", tag);
    }
}
