//! Low-level tabular text primitives
//!
//! RFC4180-style rows: comma-separated fields, quoted fields may embed
//! separators, newlines, and doubled quotes for a literal quote. Consumers
//! resolve columns by header name, never by position.

/// Split a full tabular text into records of fields.
///
/// Quoted fields may span lines; a `""` inside a quoted field is a literal
/// quote. A trailing newline does not produce an empty record.
#[must_use]
pub fn split_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut chars = text.chars().peekable();
    // True once the current record has any content, so blank lines are skipped
    // but a record ending in a trailing comma still yields its empty field.
    let mut field_started = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                field_started = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                field_started = true;
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                end_record(&mut records, &mut record, &mut field, &mut field_started);
            }
            '\n' => {
                end_record(&mut records, &mut record, &mut field, &mut field_started);
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }
    end_record(&mut records, &mut record, &mut field, &mut field_started);

    records
}

fn end_record(
    records: &mut Vec<Vec<String>>,
    record: &mut Vec<String>,
    field: &mut String,
    field_started: &mut bool,
) {
    if *field_started || !record.is_empty() {
        record.push(std::mem::take(field));
        records.push(std::mem::take(record));
    }
    *field_started = false;
}

/// Quote a field for emission if it contains a separator, quote, or newline.
#[must_use]
pub fn quote_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('"');
        for c in value.chars() {
            if c == '"' {
                out.push('"');
            }
            out.push(c);
        }
        out.push('"');
        out
    } else {
        value.to_string()
    }
}

/// Join fields into one emitted row.
#[must_use]
pub fn join_row(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| quote_field(f))
        .collect::<Vec<_>>()
        .join(",")
}
