//! CSV exports with fixed column headers.

use crawler::NetworkCall;

use crate::records::{AnalyticsEvent, TechStackItem};

/// Longest POST-body preview carried into the raw-calls export.
const EXPORT_BODY_PREVIEW: usize = 100;

fn write_rows(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut writer = csv::Writer::from_writer(Vec::new());
    // Writes into a Vec cannot fail on I/O
    let _ = writer.write_record(headers);
    for row in rows {
        let _ = writer.write_record(&row);
    }
    let bytes = writer.into_inner().unwrap_or_default();
    String::from_utf8(bytes).unwrap_or_default()
}

/// Tech-stack export.
pub fn export_tech_csv(items: &[TechStackItem]) -> String {
    write_rows(
        &["Technology", "Category", "Top Confidence", "Occurrences", "Evidence"],
        items
            .iter()
            .map(|item| {
                vec![
                    item.name.clone(),
                    item.category.clone(),
                    format!("{:.2}", item.confidence),
                    item.occurrences.to_string(),
                    item.evidence.clone().unwrap_or_default(),
                ]
            })
            .collect(),
    )
}

/// Analytics-events export.
pub fn export_analytics_csv(events: &[AnalyticsEvent]) -> String {
    write_rows(
        &["Provider", "Event Name", "Page URL", "Request URL", "Notes", "Occurrences"],
        events
            .iter()
            .map(|event| {
                vec![
                    event.provider.clone(),
                    event.event_name.clone(),
                    event.page_url.clone(),
                    event.request_url.clone(),
                    event.notes.clone().unwrap_or_default(),
                    event.occurrences.to_string(),
                ]
            })
            .collect(),
    )
}

/// Raw captured-calls export.
pub fn export_calls_csv(calls: &[NetworkCall]) -> String {
    write_rows(
        &[
            "Page URL",
            "Request URL",
            "Method",
            "Host",
            "Pathname",
            "Query Params",
            "Has POST Data",
            "POST Data Preview",
        ],
        calls
            .iter()
            .map(|call| {
                vec![
                    call.page_url.clone(),
                    call.url.clone(),
                    call.method.clone(),
                    call.host.clone(),
                    call.pathname.clone(),
                    serde_json::to_string(&call.query_params).unwrap_or_default(),
                    if call.post_data.is_some() { "yes" } else { "no" }.to_string(),
                    call.post_data
                        .as_deref()
                        .map(|b| ai_client::truncate_to_char_boundary(b, EXPORT_BODY_PREVIEW).to_string())
                        .unwrap_or_default(),
                ]
            })
            .collect(),
    )
}
