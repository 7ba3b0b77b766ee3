use crate::search_client::{AttributeValue, Record, number_text};

/// Shown for null or missing cells.
pub const PLACEHOLDER: &str = "N/A";

const CURRENCY_SYMBOL: &str = "$";
const PRICE_COLUMN: &str = "price";
const IDENTITY_COLUMN: &str = "id";

/// Ordered, de-duplicated column names for a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: Vec<String>,
}

impl ColumnSchema {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Union of attribute names across `records`, minus `id`, in first-seen order.
///
/// Records are scanned in the given order and, within a record, in its own
/// attribute order.
pub fn build_schema(records: &[Record]) -> ColumnSchema {
    let mut columns: Vec<String> = Vec::new();

    for record in records {
        for name in record.keys() {
            if name == IDENTITY_COLUMN || columns.iter().any(|c| c == name) {
                continue;
            }
            columns.push(name.to_string());
        }
    }

    ColumnSchema { columns }
}

/// `release_year` becomes `Release Year`.
pub fn format_header(name: &str) -> String {
    name.split('_')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Render a single cell.
///
/// Null wins over every other rule, so a null price is still the placeholder.
pub fn format_cell(value: Option<&AttributeValue>, column: &str) -> String {
    match value {
        None | Some(AttributeValue::Null) => PLACEHOLDER.to_string(),
        Some(AttributeValue::Number(number)) if column == PRICE_COLUMN => {
            format!("{}{}", CURRENCY_SYMBOL, number_text(number))
        }
        Some(AttributeValue::List(items)) => items
            .iter()
            .map(AttributeValue::to_text)
            .collect::<Vec<String>>()
            .join(", "),
        Some(other) => other.to_text(),
    }
}

/// A result set laid out for display: the schema plus one formatted row per
/// record. Every record yields a full row, even if it has none of the columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTable {
    schema: ColumnSchema,
    rows: Vec<Vec<String>>,
}

impl ResultTable {
    pub fn build(records: &[Record]) -> Self {
        let schema = build_schema(records);
        let rows = records
            .iter()
            .map(|record| {
                schema
                    .columns()
                    .iter()
                    .map(|column| format_cell(record.get(column), column))
                    .collect()
            })
            .collect();

        Self { schema, rows }
    }

    pub fn headers(&self) -> Vec<String> {
        self.schema.columns().iter().map(|c| format_header(c)).collect()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
