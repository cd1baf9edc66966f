use itertools::Itertools;

use crate::report::Document;

pub fn render(document: &Document) -> String {
    let mut lines = vec![document.title.to_uppercase(), String::new()];

    lines.extend(document.summary.iter().cloned());
    if !document.summary.is_empty() {
        lines.push(String::new());
    }

    for section in &document.sections {
        if let Some(ref heading) = section.heading {
            lines.push(format!("=== {} ===", heading));
        }

        if let Some(ref table) = section.table {
            lines.push(table.columns.iter().map(|c| c.to_uppercase()).join("\t"));
            lines.extend(table.rows.iter().map(|row| row.iter().join("\t")));
        }

        for note in &section.notes {
            if note.alert {
                lines.push(format!("!! {}", note.text));
            } else {
                lines.push(note.text.clone());
            }
        }
        lines.push(String::new());
    }

    lines.extend(document.closing.iter().cloned());
    if !document.closing.is_empty() {
        lines.push(String::new());
    }

    lines.push(format!("Report generated at: {}", document.generated_at));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
