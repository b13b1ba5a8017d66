//! Rendering of the printable consultation document. Pure string
//! construction, no I/O.

/// Input to the renderer. Optional sections (examination results, plan,
/// notes) use the empty string as "absent" and are omitted from the output
/// entirely rather than rendered as empty blocks.
pub struct ConsultationRecord {
    pub patient_name: String,
    pub patient_age: String,
    pub date: String,
    pub summary: String,
    pub examination_results: String,
    pub diagnosis: String,
    pub prescription: String,
    pub treatment_plan: String,
    pub doctor_notes: String,
}

/// Escapes `& < > " '` and turns newlines into `<br>`. One-directional;
/// never applied twice to the same value.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#039;")
        .replace('\n', "<br>")
}

fn section(title: &str, sanitized_content: &str) -> String {
    format!(
        r#"      <div class="section">
        <div class="section-title">{}</div>
        <div class="section-content">{}</div>
      </div>
"#,
        title, sanitized_content
    )
}

const DOCUMENT_STYLE: &str = r#"        @media print {
          @page {
            size: A4;
            margin: 2cm;
          }
        }

        body {
          font-family: Arial, Helvetica, sans-serif;
          line-height: 1.6;
          color: #333;
          max-width: 800px;
          margin: 0 auto;
          padding: 20px;
        }

        .header {
          text-align: center;
          margin-bottom: 30px;
          border-bottom: 2px solid #444;
          padding-bottom: 10px;
        }

        .title {
          font-size: 24px;
          font-weight: bold;
          margin-bottom: 10px;
        }

        .patient-info {
          margin-bottom: 30px;
        }

        .patient-info p {
          margin: 5px 0;
        }

        .section {
          margin-bottom: 30px;
        }

        .section-title {
          font-size: 18px;
          font-weight: bold;
          margin-bottom: 10px;
          border-bottom: 1px solid #ddd;
          padding-bottom: 5px;
        }

        .section-content {
          padding-left: 10px;
        }

        .print-button {
          background-color: #4CAF50;
          color: white;
          padding: 10px 15px;
          border: none;
          border-radius: 4px;
          cursor: pointer;
          font-size: 16px;
          display: block;
          margin: 20px auto;
        }

        .print-button:hover {
          background-color: #45a049;
        }

        @media print {
          .print-button {
            display: none;
          }
        }"#;

/// Renders the consultation record as a self-contained, print-styled HTML
/// document. Deterministic: the same record always yields the same string.
pub fn render(record: &ConsultationRecord) -> String {
    let name = escape_html(&record.patient_name);
    let age = escape_html(&record.patient_age);
    let date = escape_html(&record.date);

    let mut sections = String::new();
    sections.push_str(&section(
        "Patient Complaint & Medical History",
        &escape_html(&record.summary),
    ));
    if !record.examination_results.is_empty() {
        sections.push_str(&section(
            "Examination Results",
            &escape_html(&record.examination_results),
        ));
    }
    sections.push_str(&section("Diagnosis", &escape_html(&record.diagnosis)));
    sections.push_str(&section("Management", &escape_html(&record.prescription)));
    if !record.treatment_plan.is_empty() {
        sections.push_str(&section("Plan", &escape_html(&record.treatment_plan)));
    }
    if !record.doctor_notes.is_empty() {
        sections.push_str(&section(
            "Additional Notes",
            &escape_html(&record.doctor_notes),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
    <head>
      <meta charset="UTF-8">
      <meta name="viewport" content="width=device-width, initial-scale=1.0">
      <title>Medical Consultation Document - {name}</title>
      <style>
{style}
      </style>
    </head>
    <body>
      <div class="header">
        <div class="title">MEDICAL CONSULTATION DOCUMENT</div>
        <div>Date: {date}</div>
      </div>

      <div class="patient-info">
        <p><strong>Patient Name:</strong> {name}</p>
        <p><strong>Patient Age:</strong> {age}</p>
      </div>

{sections}
      <button class="print-button" onclick="window.print()">Print Document</button>
    </body>
</html>
"#,
        name = name,
        age = age,
        date = date,
        style = DOCUMENT_STYLE,
        sections = sections,
    )
}

/// Plain-text rendition of the record for "Copy to Clipboard". Pure
/// formatting, no network.
pub fn clipboard_text(record: &ConsultationRecord) -> String {
    let name = if record.patient_name.is_empty() {
        "[Name]"
    } else {
        &record.patient_name
    };
    let age = if record.patient_age.is_empty() {
        "[Age]"
    } else {
        &record.patient_age
    };

    format!(
        "Patient: {}; Age: {}\n\n\
         Patient complaint and medical history:\n{}\n\n\
         Examination results:\n{}\n\n\
         Diagnosis:\n{}\n\n\
         Management:\n{}\n\n\
         Plan:\n{}",
        name,
        age,
        record.summary,
        record.examination_results,
        record.diagnosis,
        record.prescription,
        record.treatment_plan,
    )
}
