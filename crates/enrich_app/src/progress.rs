use enrich_core::BatchState;

const BAR_WIDTH: usize = 24;

/// One status line for the terminal, e.g.
/// `[############------------] 3/6 ok 3 failed 0 eta 12s  hola`.
pub(crate) fn progress_line(state: &BatchState) -> String {
    let filled = (state.fraction_complete() * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    let mut line = format!(
        "[{}{}] {}/{} ok {} failed {}",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        state.total_processed,
        state.total_requested,
        state.successful,
        state.failed
    );
    if let Some(eta) = state.estimated_seconds_remaining {
        line.push_str(&format!(" eta {}s", eta.ceil() as u64));
    }
    if let Some(text) = &state.current_item_text {
        line.push_str("  ");
        line.push_str(text);
    }
    line
}
