//! Column layout for listings, in the manner of `ls`.

pub const DEFAULT_WIDTH: usize = 80;
const COLUMN_GAP: usize = 2;

/// Lay `items` out in as many columns as fit in `width`, filling columns first.
/// Every line ends with a newline; an empty list gives an empty string.
pub fn tabformat<S: AsRef<str>>(items: &[S], width: usize) -> String {
    if items.is_empty() {
        return String::new();
    }
    let column_width = items
        .iter()
        .map(|s| s.as_ref().chars().count())
        .max()
        .unwrap_or(0)
        + COLUMN_GAP;
    let columns = (width / column_width).max(1);
    let rows = items.len().div_ceil(columns);

    let mut out = String::new();
    for row in 0..rows {
        let cells: Vec<&str> = (0..columns)
            .filter_map(|col| items.get(col * rows + row))
            .map(|s| s.as_ref())
            .collect();
        for (i, cell) in cells.iter().enumerate() {
            if i + 1 == cells.len() {
                out.push_str(cell);
            } else {
                out.push_str(&format!("{:<width$}", cell, width = column_width));
            }
        }
        out.push('\n');
    }
    out
}
