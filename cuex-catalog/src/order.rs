use crate::catalog::StimulusCatalog;
use crate::error::{CatalogError, CatalogResult};
use calamine::Reader;
use cuex_core::{normalize_basename, TestCondition};
use std::path::Path;

const HEADER_NAMES: [&str; 3] = ["basename", "name", "filename"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderFormat {
    Delimited(u8),
    /// Read-only; orders are written back as CSV.
    Spreadsheet,
}

fn format_for(path: &Path) -> CatalogResult<OrderFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("csv") | Some("txt") | None => Ok(OrderFormat::Delimited(b',')),
        Some("tsv") | Some("tab") => Ok(OrderFormat::Delimited(b'\t')),
        Some("xlsx") | Some("xlsm") | Some("xls") | Some("xlsb") | Some("ods") => Ok(OrderFormat::Spreadsheet),
        _ => Err(CatalogError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Reads the first column of an order file or of the first sheet of a
/// spreadsheet. A leading header cell such as `basename` is skipped; blank
/// cells are ignored.
pub fn read_order(path: &Path) -> CatalogResult<Vec<String>> {
    let cells = match format_for(path)? {
        OrderFormat::Delimited(delimiter) => delimited_column(path, delimiter)?,
        OrderFormat::Spreadsheet => spreadsheet_column(path)?,
    };

    let mut names = Vec::new();
    for (row, cell) in cells.iter().enumerate() {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        if row == 0 && HEADER_NAMES.contains(&normalize_basename(cell).as_str()) {
            continue;
        }
        names.push(cell.to_string());
    }
    if names.is_empty() {
        return Err(CatalogError::EmptyOrder(path.to_path_buf()));
    }
    tracing::debug!(path = %path.display(), names = names.len(), "order file read");
    Ok(names)
}

fn delimited_column(path: &Path, delimiter: u8) -> CatalogResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)?;
    let mut cells = Vec::new();
    for record in reader.records() {
        cells.push(record?.get(0).unwrap_or_default().to_string());
    }
    Ok(cells)
}

fn spreadsheet_column(path: &Path) -> CatalogResult<Vec<String>> {
    let mut workbook = calamine::open_workbook_auto(path)?;
    let Some(range) = workbook.worksheet_range_at(0) else {
        return Err(CatalogError::EmptyOrder(path.to_path_buf()));
    };
    Ok(range?
        .rows()
        .map(|row| row.first().map(ToString::to_string).unwrap_or_default())
        .collect())
}

/// Writes normalized basenames, one per row, under a `basename` header.
pub fn write_order<S: AsRef<str>>(path: &Path, names: &[S]) -> CatalogResult<()> {
    let OrderFormat::Delimited(delimiter) = format_for(path)? else {
        return Err(CatalogError::UnsupportedFormat(path.to_path_buf()));
    };
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)?;
    writer.write_record(["basename"])?;
    for name in names {
        writer.write_record([normalize_basename(name.as_ref())])?;
    }
    writer.flush().map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Exports the image order `test` would run with: the manual order if one
/// is set, otherwise the pool after repetitions and the configured shuffle.
/// Returns the seed of that shuffle.
pub fn export_order(catalog: &StimulusCatalog, test: TestCondition, path: &Path) -> CatalogResult<Option<u64>> {
    let resolved = catalog.resolve(test);
    write_order(path, &resolved.sequence.keys())?;
    Ok(resolved.seed)
}

impl StimulusCatalog {
    /// Imports an order file as the manual order of `test`.
    pub fn import_order(&mut self, test: TestCondition, path: &Path) -> CatalogResult<usize> {
        let names = read_order(path)?;
        self.set_manual_order(test, &names)?;
        Ok(names.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSettings;
    use cuex_core::{ImageStimulus, Origin};
    use std::path::PathBuf;

    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("cuex-order-{tag}-{}", std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn catalog() -> StimulusCatalog {
        let neutral = ["water.jpg", "Soda_Can.jpg", "juice.png"]
            .iter()
            .map(|n| ImageStimulus::new(format!("/n/{n}"), Origin::Neutral))
            .collect();
        StimulusCatalog::new(Vec::new(), neutral, CatalogSettings::default())
    }

    #[test]
    fn import_skips_header_and_blank_rows() {
        let dir = ScratchDir::new("import");
        let file = dir.0.join("order.csv");
        std::fs::write(&file, "Basename,notes\njuice,x\n\nsoda can\nWATER.jpg\n").unwrap();

        let mut c = catalog();
        assert_eq!(c.import_order(TestCondition::UnisensoryNeutralVisual, &file).unwrap(), 3);
        let r = c.resolve(TestCondition::UnisensoryNeutralVisual);
        assert_eq!(r.sequence.basenames(), vec!["juice", "Soda_Can", "water"]);
    }

    #[test]
    fn import_reports_every_missing_name() {
        let dir = ScratchDir::new("missing");
        let file = dir.0.join("order.tsv");
        std::fs::write(&file, "water\tx\ngin\nrum\n").unwrap();
        let err = catalog()
            .import_order(TestCondition::UnisensoryNeutralVisual, &file)
            .unwrap_err();
        assert!(err.to_string().contains("gin, rum"));
    }

    #[test]
    fn import_then_export_preserves_normalized_order() {
        let dir = ScratchDir::new("roundtrip");
        let src = dir.0.join("in.csv");
        let out = dir.0.join("out.csv");
        std::fs::write(&src, "Soda_Can.jpg\nwater\njuice\n").unwrap();

        let mut c = catalog();
        c.import_order(TestCondition::UnisensoryNeutralVisual, &src).unwrap();
        export_order(&c, TestCondition::UnisensoryNeutralVisual, &out).unwrap();

        let exported = read_order(&out).unwrap();
        let imported: Vec<String> = read_order(&src)
            .unwrap()
            .iter()
            .map(|n| normalize_basename(n))
            .collect();
        assert_eq!(exported, imported);
        assert_eq!(exported, vec!["sodacan", "water", "juice"]);
    }

    #[test]
    fn export_follows_the_seeded_shuffle() {
        let dir = ScratchDir::new("shuffled");
        let out = dir.0.join("out.csv");
        let mut c = catalog();
        c.settings_mut().randomize_cues = true;
        c.settings_mut().seed = Some(42);
        let test = TestCondition::UnisensoryNeutralVisual;

        assert_eq!(export_order(&c, test, &out).unwrap(), Some(42));
        assert_eq!(read_order(&out).unwrap(), c.resolve(test).sequence.keys());
    }

    #[test]
    fn spreadsheet_first_column_is_imported() {
        let file = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/order.xlsx");
        assert_eq!(read_order(&file).unwrap(), vec!["juice", "soda can", "WATER.jpg"]);

        let mut c = catalog();
        assert_eq!(c.import_order(TestCondition::UnisensoryNeutralVisual, &file).unwrap(), 3);
        let r = c.resolve(TestCondition::UnisensoryNeutralVisual);
        assert_eq!(r.sequence.basenames(), vec!["juice", "Soda_Can", "water"]);
    }

    #[test]
    fn orders_are_not_written_as_spreadsheets() {
        let dir = ScratchDir::new("xlsx-out");
        let err = write_order(&dir.0.join("order.xlsx"), &["water"]).unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedFormat(_)));
        let err = read_order(Path::new("/tmp/order.pdf")).unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedFormat(_)));
    }
}
