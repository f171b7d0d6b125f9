//! Restricted response header interception.
//!
//! A small, fixed set of response header names must be realized through native
//! connection properties instead of being stored: `Content-Length`,
//! `Keep-Alive` and `Transfer-Encoding`. [`ResponseHeaderWriter`] decorates a
//! plain [`HeaderStore`]: writes to a restricted name are diverted to a
//! [`NativeResponseProps`] implementation, every other name falls through to
//! ordinary storage. Reads always come from the store; the interceptor never
//! synthesizes a read from the native properties.

use super::store::HeaderStore;

const CONTENT_LENGTH: &str = "content-length";
const KEEP_ALIVE: &str = "keep-alive";
const TRANSFER_ENCODING: &str = "transfer-encoding";

/// Native response properties that restricted header writes are redirected to.
pub trait NativeResponseProps {
    fn set_content_length(&mut self, length: i64);
    fn set_keep_alive(&mut self, keep_alive: bool);
    fn enable_chunked(&mut self);
}

/// Decorator over [`HeaderStore`] that special-cases the restricted names and
/// delegates everything else to plain multi-value storage.
#[derive(Debug, Default)]
pub struct ResponseHeaderWriter<N> {
    store: HeaderStore,
    native: N,
}

impl<N: NativeResponseProps> ResponseHeaderWriter<N> {
    pub fn new(native: N) -> Self {
        Self { store: HeaderStore::new(), native }
    }

    /// Replaces the value array for `name`, unless the name is restricted, in
    /// which case the write is redirected and nothing is stored.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        if self.intercept(name, &values) {
            return;
        }
        self.store.set(name, values);
    }

    /// Replaces `name` with a single raw value, with the same redirection
    /// rule as [`set`](Self::set). An empty value removes the key.
    pub fn set_value(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if self.intercept(name, std::slice::from_ref(&value)) {
            return;
        }
        self.store.set_value(name, value);
    }

    /// Appends one raw value, with the same redirection rule as
    /// [`set`](Self::set).
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if self.intercept(name, std::slice::from_ref(&value)) {
            return;
        }
        self.store.append(name, value);
    }

    /// The backing store. Reads fall through here unconditionally.
    pub fn store(&self) -> &HeaderStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut HeaderStore {
        &mut self.store
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut N {
        &mut self.native
    }

    pub fn into_parts(self) -> (HeaderStore, N) {
        (self.store, self.native)
    }

    fn intercept(&mut self, name: &str, values: &[String]) -> bool {
        if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            // first element wins; unparseable lengths collapse to 0
            let length = values.first().and_then(|value| value.trim().parse::<i64>().ok()).unwrap_or(0);
            self.native.set_content_length(length);
            true
        } else if name.eq_ignore_ascii_case(KEEP_ALIVE) {
            let keep_alive = values.first().and_then(|value| parse_bool(value)).unwrap_or(true);
            self.native.set_keep_alive(keep_alive);
            true
        } else if name.eq_ignore_ascii_case(TRANSFER_ENCODING) {
            // chunked can be signaled from any array position; other codings
            // are ignored and never stored or forwarded
            if values.iter().any(|value| value.trim().eq_ignore_ascii_case("chunked")) {
                self.native.enable_chunked();
            }
            true
        } else {
            false
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Some(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Eq)]
    struct RecordedProps {
        content_length: Option<i64>,
        keep_alive: Option<bool>,
        chunked: bool,
    }

    impl NativeResponseProps for RecordedProps {
        fn set_content_length(&mut self, length: i64) {
            self.content_length = Some(length);
        }

        fn set_keep_alive(&mut self, keep_alive: bool) {
            self.keep_alive = Some(keep_alive);
        }

        fn enable_chunked(&mut self) {
            self.chunked = true;
        }
    }

    #[test]
    fn content_length_is_redirected_and_never_stored() {
        let mut writer = ResponseHeaderWriter::new(RecordedProps::default());
        writer.set("Content-Length", vec!["42".to_owned()]);

        assert_eq!(writer.native().content_length, Some(42));
        assert!(!writer.store().contains("content-length"));
    }

    #[test]
    fn unparseable_content_length_defaults_to_zero() {
        let mut writer = ResponseHeaderWriter::new(RecordedProps::default());
        writer.set("content-length", vec!["not-a-number".to_owned()]);

        assert_eq!(writer.native().content_length, Some(0));
    }

    #[test]
    fn keep_alive_parses_first_element_with_true_default() {
        let mut writer = ResponseHeaderWriter::new(RecordedProps::default());
        writer.set("Keep-Alive", vec![" FALSE ".to_owned()]);
        assert_eq!(writer.native().keep_alive, Some(false));

        writer.set("keep-alive", vec!["maybe".to_owned()]);
        assert_eq!(writer.native().keep_alive, Some(true));
        assert!(!writer.store().contains("keep-alive"));
    }

    #[test]
    fn chunked_is_detected_in_any_position() {
        let mut writer = ResponseHeaderWriter::new(RecordedProps::default());
        writer.set("Transfer-Encoding", vec!["gzip".to_owned(), " Chunked ".to_owned()]);

        assert!(writer.native().chunked);
        assert!(!writer.store().contains("transfer-encoding"));
    }

    #[test]
    fn other_codings_make_no_change() {
        let mut writer = ResponseHeaderWriter::new(RecordedProps::default());
        writer.set("transfer-encoding", vec!["gzip".to_owned()]);

        assert!(!writer.native().chunked);
        assert!(!writer.store().contains("transfer-encoding"));
    }

    #[test]
    fn ordinary_names_fall_through_to_storage() {
        let mut writer = ResponseHeaderWriter::new(RecordedProps::default());
        writer.set("X-Custom", vec!["a".to_owned()]);
        writer.append("x-custom", "b");

        assert_eq!(writer.store().get("X-CUSTOM"), Some(&["a".to_owned(), "b".to_owned()][..]));
        assert_eq!(writer.native(), &RecordedProps::default());
    }

    #[test]
    fn empty_single_value_removes_the_key() {
        let mut writer = ResponseHeaderWriter::new(RecordedProps::default());
        writer.set_value("X-Custom", "a");
        assert!(writer.store().contains("x-custom"));

        writer.set_value("X-Custom", "");
        assert!(!writer.store().contains("x-custom"));
        assert!(writer.store().is_empty());
    }

    #[test]
    fn append_to_restricted_name_is_redirected() {
        let mut writer = ResponseHeaderWriter::new(RecordedProps::default());
        writer.append("content-length", "7");

        assert_eq!(writer.native().content_length, Some(7));
        assert!(writer.store().is_empty());
    }
}
