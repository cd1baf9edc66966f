use itertools::Itertools;

use crate::report::{Document, Note, Table, Tone};

const TABLE_STYLE: &str = "border-collapse: collapse; margin-bottom: 20px;";
const HEADER_STYLE: &str = "background-color: #f2f2f2;";

pub fn render(document: &Document) -> String {
    let mut lines = vec![
        "<html><body>".to_owned(),
        format!(
            "<h2 style=\"color: {};\">{}</h2>",
            title_color(document.tone),
            escape(&document.title)
        ),
    ];

    lines.extend(document.summary.iter().map(|p| paragraph(p)));

    for section in &document.sections {
        if let Some(ref heading) = section.heading {
            lines.push(format!("<h3>{}</h3>", escape(heading)));
        }
        if let Some(ref table) = section.table {
            lines.extend(render_table(table));
        }
        lines.extend(section.notes.iter().map(render_note));
    }

    lines.extend(document.closing.iter().map(|p| paragraph(p)));
    lines.push(format!(
        "<p><em>Report generated at: {}</em></p>",
        escape(&document.generated_at)
    ));
    lines.push("</body></html>".to_owned());

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn render_table(table: &Table) -> Vec<String> {
    let mut lines = vec![
        format!(
            "<table border=\"1\" cellpadding=\"5\" cellspacing=\"0\" style=\"{}\">",
            TABLE_STYLE
        ),
        format!(
            "<tr style=\"{}\">{}</tr>",
            HEADER_STYLE,
            table
                .columns
                .iter()
                .map(|c| format!("<th>{}</th>", escape(c)))
                .join("")
        ),
    ];
    lines.extend(table.rows.iter().map(|row| {
        format!(
            "<tr>{}</tr>",
            row.iter().map(|c| format!("<td>{}</td>", escape(c))).join("")
        )
    }));
    lines.push("</table>".to_owned());
    lines
}

fn render_note(note: &Note) -> String {
    if note.alert {
        format!("<p style=\"color: #CC0000;\">{}</p>", escape(&note.text))
    } else {
        format!("<p><em>{}</em></p>", escape(&note.text))
    }
}

fn paragraph(text: &str) -> String {
    format!("<p>{}</p>", escape(text))
}

fn title_color(tone: Tone) -> &'static str {
    match tone {
        Tone::Info => "#333333",
        Tone::Warning => "#FF6600",
        Tone::Alert => "#FF0000",
    }
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
