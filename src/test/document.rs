use crate::document::{clipboard_text, escape_html, render, ConsultationRecord};

fn record() -> ConsultationRecord {
    ConsultationRecord {
        patient_name: "Jane Doe".to_string(),
        patient_age: "45".to_string(),
        date: "2025-06-01".to_string(),
        summary: "Sore throat for three days".to_string(),
        examination_results: String::new(),
        diagnosis: "Acute pharyngitis".to_string(),
        prescription: "Paracetamol 500mg".to_string(),
        treatment_plan: String::new(),
        doctor_notes: String::new(),
    }
}

#[test]
fn test_escape_html() {
    assert_eq!(
        escape_html("a & b < c > d \" e ' f"),
        "a &amp; b &lt; c &gt; d &quot; e &#039; f"
    );
    assert_eq!(escape_html("line one\nline two"), "line one<br>line two");
}

#[test]
fn test_script_tags_are_escaped() {
    let mut record = record();
    record.summary = "<script>alert('x')</script>".to_string();

    let html = render(&record);

    assert!(html.contains("&lt;script&gt;"));
    assert!(!html.contains("<script>alert"));
}

#[test]
fn test_empty_optional_sections_are_omitted() {
    let html = render(&record());

    assert!(!html.contains(r#"<div class="section-title">Plan</div>"#));
    assert!(!html.contains(r#"<div class="section-title">Examination Results</div>"#));
    assert!(!html.contains(r#"<div class="section-title">Additional Notes</div>"#));

    // The mandatory sections always render.
    assert!(html.contains(r#"<div class="section-title">Patient Complaint & Medical History</div>"#));
    assert!(html.contains(r#"<div class="section-title">Diagnosis</div>"#));
    assert!(html.contains(r#"<div class="section-title">Management</div>"#));
}

#[test]
fn test_treatment_plan_renders_exactly_once() {
    let mut record = record();
    record.treatment_plan = "Review in two weeks & rest".to_string();

    let html = render(&record);

    let occurrences = html
        .matches(r#"<div class="section-title">Plan</div>"#)
        .count();
    assert_eq!(occurrences, 1);
    assert!(html.contains("Review in two weeks &amp; rest"));
}

#[test]
fn test_patient_identity_is_rendered() {
    let html = render(&record());

    assert!(html.contains("Jane Doe"));
    assert!(html.contains("<strong>Patient Age:</strong> 45"));
    assert!(html.contains("Date: 2025-06-01"));
}

#[test]
fn test_render_is_deterministic() {
    let record = record();
    assert_eq!(render(&record), render(&record));
}

#[test]
fn test_clipboard_text_formatting() {
    let mut record = record();
    record.treatment_plan = "Review in two weeks".to_string();

    let text = clipboard_text(&record);

    assert!(text.starts_with("Patient: Jane Doe; Age: 45"));
    assert!(text.contains("Diagnosis:\nAcute pharyngitis"));
    assert!(text.contains("Management:\nParacetamol 500mg"));
    assert!(text.contains("Plan:\nReview in two weeks"));
}

#[test]
fn test_clipboard_text_placeholders_for_missing_identity() {
    let mut record = record();
    record.patient_name = String::new();
    record.patient_age = String::new();

    let text = clipboard_text(&record);

    assert!(text.starts_with("Patient: [Name]; Age: [Age]"));
}
