use std::time::Duration;

use super::AdapterError;

// ---------------------------------------------------------------------------
// Table – a parsed CSV response
// ---------------------------------------------------------------------------

/// A CSV table returned by an archive: header plus string records.
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl Table {
    /// Parse a CSV body. An empty body is an empty table.
    pub fn parse(text: &str) -> Result<Self, AdapterError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| AdapterError::Malformed(format!("CSV header: {e}")))?
            .iter()
            .map(|h| h.to_string())
            .collect();
        let rows = reader
            .records()
            .enumerate()
            .map(|(i, r)| r.map_err(|e| AdapterError::Malformed(format!("CSV row {i}: {e}"))))
            .collect::<Result<_, _>>()?;
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a required column.
    pub fn column(&self, name: &str) -> Result<usize, AdapterError> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| AdapterError::Malformed(format!("missing column '{name}'")))
    }

    pub fn str(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).unwrap_or("")
    }

    /// Numeric cell; empty, `null` and `nan` cells are `None`.
    pub fn opt_f64(&self, row: usize, col: usize) -> Result<Option<f64>, AdapterError> {
        let cell = self.str(row, col);
        if cell.is_empty() || cell.eq_ignore_ascii_case("null") || cell.eq_ignore_ascii_case("nan")
        {
            return Ok(None);
        }
        cell.parse::<f64>().map(Some).map_err(|_| {
            AdapterError::Malformed(format!("row {row}: '{cell}' is not a number"))
        })
    }

    pub fn f64(&self, row: usize, col: usize) -> Result<f64, AdapterError> {
        self.opt_f64(row, col)?.ok_or_else(|| {
            AdapterError::Malformed(format!("row {row}: missing value in column {col}"))
        })
    }

    pub fn bool(&self, row: usize, col: usize) -> bool {
        matches!(self.str(row, col).to_ascii_lowercase().as_str(), "true" | "t" | "1")
    }
}

// ---------------------------------------------------------------------------
// TableSource – how adapters reach an archive
// ---------------------------------------------------------------------------

/// Fetches a CSV table from an archive endpoint.
pub trait TableSource: Send + Sync {
    fn fetch(&self, url: &str, params: &[(&str, String)]) -> Result<Table, AdapterError>;
}

/// Blocking HTTP transport. Each worker thread blocks on its own request.
#[derive(Debug, Clone)]
pub struct HttpTableSource {
    client: reqwest::blocking::Client,
}

impl HttpTableSource {
    pub fn new(timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rusty-lightcurves/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

impl TableSource for HttpTableSource {
    fn fetch(&self, url: &str, params: &[(&str, String)]) -> Result<Table, AdapterError> {
        log::debug!("GET {url} {params:?}");
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .map_err(|e| AdapterError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        if !status.is_success() {
            let message: String = body.chars().take(200).collect();
            return Err(AdapterError::Archive {
                status: status.as_u16(),
                message,
            });
        }
        Table::parse(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_numbers() {
        let table = Table::parse("source_id,mag,flag\n12,17.5,True\n13,,false\n").unwrap();
        assert_eq!(table.len(), 2);
        let mag = table.column("MAG").unwrap();
        assert_eq!(table.f64(0, mag).unwrap(), 17.5);
        assert_eq!(table.opt_f64(1, mag).unwrap(), None);
        assert!(table.bool(0, table.column("flag").unwrap()));
    }

    #[test]
    fn empty_body_is_empty_table() {
        assert!(Table::parse("  \n").unwrap().is_empty());
        assert!(Table::parse("a,b\n").unwrap().is_empty());
    }

    #[test]
    fn missing_column_is_malformed() {
        let table = Table::parse("a\n1\n").unwrap();
        assert!(matches!(table.column("b"), Err(AdapterError::Malformed(_))));
    }
}
