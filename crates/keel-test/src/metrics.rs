//! Reading values back from the process-wide metrics registry.

/// Returns the current value of the sample `name{labels}`.
///
/// Labels must be given in the order they were recorded with. Installs the
/// recorder if needed, so reading before anything was recorded yields `None`.
#[must_use]
pub fn metric_value(name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    keel_telemetry::init_metrics().ok()?;
    let rendered = keel_telemetry::render_metrics()?;
    sample_value(&rendered, name, labels)
}

/// Finds the sample `name{labels}` in Prometheus text exposition output.
#[must_use]
pub fn sample_value(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let selector = if labels.is_empty() {
        name.to_string()
    } else {
        let pairs: Vec<String> = labels
            .iter()
            .map(|(key, value)| format!("{key}=\"{value}\""))
            .collect();
        format!("{name}{{{}}}", pairs.join(","))
    };

    rendered.lines().find_map(|line| {
        let rest = line.strip_prefix(&selector)?;
        let value = rest.strip_prefix(' ')?;
        value.trim().parse().ok()
    })
}
