//! Splitting scripts into cells.
//!
//! Cells are separated by `# %%` marker lines (the percent format used by
//! Jupytext and most editors). Text after the marker is the cell title.

/// One cell of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Marker title, or `cell N` when the marker has none.
    pub title: String,
    pub source: String,
}

/// Split `script` into non-empty cells.
pub fn split_cells(script: &str) -> Vec<Cell> {
    let mut cells = Vec::new();
    let mut title: Option<String> = None;
    let mut lines: Vec<&str> = Vec::new();

    for line in script.lines() {
        if let Some(rest) = line.trim_start().strip_prefix("# %%") {
            push_cell(&mut cells, title.take(), &lines);
            lines.clear();
            let rest = rest.trim();
            title = (!rest.is_empty()).then(|| rest.to_string());
        } else {
            lines.push(line);
        }
    }
    push_cell(&mut cells, title, &lines);

    cells
}

fn push_cell(cells: &mut Vec<Cell>, title: Option<String>, lines: &[&str]) {
    let source = lines.join("\n").trim_matches('\n').to_string();
    if source.trim().is_empty() {
        return;
    }
    let title = title.unwrap_or_else(|| format!("cell {}", cells.len() + 1));
    cells.push(Cell { title, source });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_without_markers_is_one_cell() {
        let cells = split_cells("x = 1\nprint(x)\n");
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].source, "x = 1\nprint(x)");
        assert_eq!(cells[0].title, "cell 1");
    }

    #[test]
    fn test_markers_split_and_title_cells() {
        let script = "import os\n\n# %% Load data\ndf = load()\n\n# %%\n%%time\ntrain(df)\n";
        let cells = split_cells(script);

        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].source, "import os");
        assert_eq!(cells[1].title, "Load data");
        assert_eq!(cells[1].source, "df = load()");
        assert_eq!(cells[2].title, "cell 3");
        assert_eq!(cells[2].source, "%%time\ntrain(df)");
    }

    #[test]
    fn test_empty_cells_are_skipped() {
        let cells = split_cells("# %% one\n\n# %% two\nx = 1");
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].title, "two");
    }
}
