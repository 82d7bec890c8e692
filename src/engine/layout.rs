use std::collections::HashSet;

use crate::limits::{MAX_COLUMNS, MAX_ROWS};
use crate::model::{SeatDefinition, SeatKind};

use super::error::LayoutError;

const ROW_SEPARATOR: char = '/';

/// Reject empty layouts, out-of-range labels and duplicate cells.
pub fn validate_layout(layout: &[SeatDefinition]) -> Result<(), LayoutError> {
    if layout.is_empty() {
        return Err(LayoutError::Empty);
    }
    let mut seen = HashSet::with_capacity(layout.len());
    for def in layout {
        if !def.row.is_ascii_uppercase() {
            return Err(LayoutError::InvalidRow { row: def.row });
        }
        if def.column == 0 || def.column > MAX_COLUMNS {
            return Err(LayoutError::InvalidColumn { row: def.row, column: def.column });
        }
        if !seen.insert((def.row, def.column)) {
            return Err(LayoutError::DuplicateCell { row: def.row, column: def.column });
        }
    }
    Ok(())
}

/// Every cell except aisles, in layout order.
pub fn active_seats(layout: &[SeatDefinition]) -> impl Iterator<Item = &SeatDefinition> {
    layout.iter().filter(|d| d.kind != SeatKind::Empty)
}

/// Normal and accessible seats.
pub fn capacity(layout: &[SeatDefinition]) -> u32 {
    layout.iter().filter(|d| d.kind.is_sellable()).count() as u32
}

/// Parse the editor grid: rows separated by `/`, one kind code per column.
///
/// `"NNENN/AAEDD"` is row A (`A1`, `A2`, aisle, `A4`, `A5`) followed by row B.
pub fn parse_grid(grid: &str) -> Result<Vec<SeatDefinition>, LayoutError> {
    let grid = grid.trim();
    if grid.is_empty() {
        return Err(LayoutError::Empty);
    }
    let rows: Vec<&str> = grid.split(ROW_SEPARATOR).collect();
    if rows.len() > MAX_ROWS {
        return Err(LayoutError::TooManyRows(rows.len()));
    }

    let mut layout = Vec::new();
    for (i, cells) in rows.iter().enumerate() {
        let row = (b'A' + i as u8) as char;
        let cells = cells.trim();
        if cells.is_empty() {
            return Err(LayoutError::EmptyRow { row });
        }
        for (j, code) in cells.chars().enumerate() {
            let column = j as u16 + 1;
            if column > MAX_COLUMNS {
                return Err(LayoutError::InvalidColumn { row, column });
            }
            let kind = SeatKind::from_code(code).ok_or(LayoutError::UnknownKind { row, column, code })?;
            layout.push(SeatDefinition::new(row, column, kind));
        }
    }
    validate_layout(&layout)?;
    Ok(layout)
}

/// Inverse of [`parse_grid`] for rectangular, gap-free layouts.
pub fn render_grid(layout: &[SeatDefinition]) -> String {
    let mut sorted: Vec<&SeatDefinition> = layout.iter().collect();
    sorted.sort_by_key(|d| (d.row, d.column));

    let mut out = String::new();
    let mut current_row = None;
    for def in sorted {
        if current_row.is_some_and(|r| r != def.row) {
            out.push(ROW_SEPARATOR);
        }
        current_row = Some(def.row);
        out.push(def.kind.code());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SeatRef;

    #[test]
    fn parse_grid_assigns_rows_and_columns() {
        let layout = parse_grid("NNENN/AAEDD").unwrap();
        assert_eq!(layout.len(), 10);
        assert_eq!(layout[0], SeatDefinition::new('A', 1, SeatKind::Normal));
        assert_eq!(layout[2].kind, SeatKind::Empty);
        assert_eq!(layout[5], SeatDefinition::new('B', 1, SeatKind::Accessible));
        assert_eq!(layout[9], SeatDefinition::new('B', 5, SeatKind::Disabled));
    }

    #[test]
    fn capacity_counts_normal_and_accessible() {
        let layout = parse_grid("NNENN/AAEDD").unwrap();
        assert_eq!(capacity(&layout), 6);
        assert_eq!(active_seats(&layout).count(), 8);
    }

    #[test]
    fn active_seats_skip_aisles() {
        let layout = parse_grid("NEN").unwrap();
        let seats: Vec<SeatRef> = active_seats(&layout).map(|d| d.seat()).collect();
        assert_eq!(seats, vec![SeatRef::new('A', 1), SeatRef::new('A', 3)]);
    }

    #[test]
    fn duplicate_cell_is_named() {
        let layout = vec![
            SeatDefinition::new('A', 1, SeatKind::Normal),
            SeatDefinition::new('A', 2, SeatKind::Normal),
            SeatDefinition::new('A', 1, SeatKind::Accessible),
        ];
        assert_eq!(
            validate_layout(&layout),
            Err(LayoutError::DuplicateCell { row: 'A', column: 1 })
        );
    }

    #[test]
    fn zero_column_rejected() {
        let layout = vec![SeatDefinition::new('A', 0, SeatKind::Normal)];
        assert_eq!(
            validate_layout(&layout),
            Err(LayoutError::InvalidColumn { row: 'A', column: 0 })
        );
    }

    #[test]
    fn bad_grids_rejected() {
        assert_eq!(parse_grid(""), Err(LayoutError::Empty));
        assert_eq!(parse_grid("NN//NN"), Err(LayoutError::EmptyRow { row: 'B' }));
        assert_eq!(
            parse_grid("NNX"),
            Err(LayoutError::UnknownKind { row: 'A', column: 3, code: 'X' })
        );
        let too_many = vec!["N"; 27].join("/");
        assert_eq!(parse_grid(&too_many), Err(LayoutError::TooManyRows(27)));
    }

    #[test]
    fn render_grid_matches_parsed_input() {
        let grid = "NNENN/AAEDD/NNNNN";
        assert_eq!(render_grid(&parse_grid(grid).unwrap()), grid);
    }
}
