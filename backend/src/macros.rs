//! Shared macros for the backend crate.

/// Generate a `fmt::Debug` implementation that keeps credentials out of logs.
///
/// Field kinds, given as a keyword before the field name:
///
/// - `show field` - prints the value normally
/// - `redact field` - always prints `"[REDACTED]"`
/// - `redact_option field` - prints `Some("[REDACTED]")` or `None`
/// - `redact_str field` - prints `""` for an empty string, `"[REDACTED]"` otherwise,
///   so "credential not set" is still visible when debugging settings
///
/// ```ignore
/// redacted_debug!(BackupSettings {
///     show retention_days,
///     show drive_service_account_email,
///     redact_option drive_private_key,
/// });
/// ```
macro_rules! redacted_debug {
    ($name:ident { $( $kind:ident $field:ident ),* $(,)? }) => {
        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let mut s = f.debug_struct(stringify!($name));
                $( redacted_debug!(@add_field s, self, $kind, $field); )*
                s.finish_non_exhaustive()
            }
        }
    };
    (@add_field $s:ident, $self:ident, show, $field:ident) => {
        $s.field(stringify!($field), &$self.$field);
    };
    (@add_field $s:ident, $self:ident, redact, $field:ident) => {
        $s.field(stringify!($field), &"[REDACTED]");
    };
    (@add_field $s:ident, $self:ident, redact_option, $field:ident) => {
        $s.field(stringify!($field), &$self.$field.as_ref().map(|_| "[REDACTED]"));
    };
    (@add_field $s:ident, $self:ident, redact_str, $field:ident) => {
        $s.field(
            stringify!($field),
            &if $self.$field.is_empty() { "" } else { "[REDACTED]" },
        );
    };
}
