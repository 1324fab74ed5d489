use std::sync::Once;

use crate::logging;

/// One-time test setup: a quiet-by-default tracing subscriber that tests can
/// raise with `LOG_LEVEL`.
pub fn setup_test() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        logging::Config::default().init();
    });
}
