/// This macro is a wrapper around `tracing::trace!` and should not be confused with snapshot
/// testing. It tags log statements with the data structure they describe, so that external tools
/// can show how the IR evolves over the course of a build.
///
/// Pass an identifier to serialize the value with serde_json and tag it with the value's type
/// name:
/// ```ignore
/// snapshot!(config, "using configuration");
/// // Generates:
/// // trace!(snapshot = "IrConfig", data = "{ .. }", "using configuration");
/// ```
/// Or pass the tag and data directly. The data must implement the tracing crate's `Value` trait,
/// which is usually done by passing a string representation:
/// ```ignore
/// snapshot!("ComputedSelectionSet", computed.to_string(), "computed selection set");
/// ```
/// Nothing is logged unless the `snapshot_tracing` feature is enabled.
macro_rules! snapshot {
    ($value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(
            snapshot = std::any::type_name_of_val(&$value),
            data = serde_json::to_string(&$value)
                .unwrap_or_else(|error| format!("<unserializable: {error}>")),
            $msg
        );
    };
    ($name:literal, $value:expr, $msg:literal) => {
        #[cfg(feature = "snapshot_tracing")]
        tracing::trace!(snapshot = $name, data = $value, $msg);
    };
}

pub(crate) use snapshot;
