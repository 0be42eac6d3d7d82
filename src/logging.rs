use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
    time::{Duration, Instant},
};

const MAX_LOGGED_BODY: usize = 512;

#[derive(Debug, Clone, Copy)]
struct WarnThrottleState {
    last: Instant,
    suppressed: u64,
}

fn shorten(value: &str, head: usize, tail: usize) -> String {
    if value.len() <= head + tail || !value.is_char_boundary(head) {
        return value.to_string();
    }
    let tail_at = value.len() - tail;
    if !value.is_char_boundary(tail_at) {
        return value.to_string();
    }
    format!("{}..{}", &value[..head], &value[tail_at..])
}

/// Auth tokens are JWTs or hex secrets; keep enough to tell two apart.
pub fn redact_token(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    if value.len() <= 12 {
        return "***".to_string();
    }
    shorten(value, 4, 4)
}

/// Response bodies end up in error messages; cap them so a HTML error page does not flood logs.
pub fn shorten_body(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= MAX_LOGGED_BODY {
        return text.into_owned();
    }
    let mut end = MAX_LOGGED_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &text[..end], raw.len())
}

/// Returns true when a warning for `key` should be emitted now.
pub fn warn_throttled(key: &str, interval: Duration) -> bool {
    let Some(suppressed) = warn_throttled_with_count(key, interval) else {
        return false;
    };
    if suppressed > 0 {
        tracing::warn!(
            event = "throttled_warning_summary",
            key,
            suppressed,
            "throttled warnings were suppressed"
        );
    }
    true
}

pub fn warn_throttled_with_count(key: &str, interval: Duration) -> Option<u64> {
    static LAST_WARN: OnceLock<Mutex<HashMap<String, WarnThrottleState>>> = OnceLock::new();
    let map = LAST_WARN.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = match map.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("warn throttle lock poisoned; continuing with recovered state");
            poisoned.into_inner()
        }
    };
    let now = Instant::now();
    if let Some(state) = guard.get_mut(key) {
        if now.saturating_duration_since(state.last) < interval {
            state.suppressed = state.suppressed.saturating_add(1);
            return None;
        }
        let suppressed = state.suppressed;
        state.last = now;
        state.suppressed = 0;
        return Some(suppressed);
    }
    guard.insert(
        key.to_string(),
        WarnThrottleState {
            last: now,
            suppressed: 0,
        },
    );
    Some(0)
}
