//! Closed column and search-key catalogs per entity type.
//!
//! Column names are the physical names of the partition tables. Only names listed
//! here are ever interpolated into SQL; everything else a caller supplies travels as a
//! bound parameter.

use sea_query::Iden;

/// Physical column name usable as a sea-query identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnName(pub &'static str);

impl Iden for ColumnName {
    fn unquoted(&self) -> &str {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Date,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: ColumnName,
    pub kind: ColumnKind,
}

const fn text(name: &'static str) -> ColumnDef {
    ColumnDef {
        name: ColumnName(name),
        kind: ColumnKind::Text,
    }
}

const fn date(name: &'static str) -> ColumnDef {
    ColumnDef {
        name: ColumnName(name),
        kind: ColumnKind::Date,
    }
}

/// How a search key is matched against its column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    /// `column = $n`
    Equals,
    /// `column LIKE '%' || $n || '%'`, with the pattern built client side
    Contains,
    /// `column >= $n` (closed range start)
    AtLeast,
    /// `column <= $n` (closed range end)
    AtMost,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchKey {
    pub key: &'static str,
    pub column: ColumnDef,
    pub op: MatchOp,
}

/// Sort direction for a partition's default ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Which of a product line's two partitions an entity lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Rma,
    Stock,
}

/// Catalog of one entity type
pub trait EntitySchema {
    const KIND: EntityKind;
    /// Human-readable entity name for messages
    const LABEL: &'static str;

    /// Identity column; immutable after insert and never part of a SET clause
    fn identity() -> ColumnName {
        SERIAL_NO
    }

    fn columns() -> &'static [ColumnDef];

    fn search_keys() -> &'static [SearchKey];

    /// Columns matched by keyword (contains) search
    fn keyword_columns() -> &'static [ColumnName];

    fn default_order() -> (ColumnName, SortOrder);

    fn column(name: &str) -> Option<&'static ColumnDef> {
        Self::columns().iter().find(|c| c.name.0 == name)
    }

    fn search_key(key: &str) -> Option<&'static SearchKey> {
        Self::search_keys().iter().find(|k| k.key == key)
    }
}

pub const SERIAL_NO: ColumnName = ColumnName("Serial_No");
pub const CREATE_DATE: ColumnName = ColumnName("Create_Date");
pub const RMA_NO: ColumnName = ColumnName("Rma_No");
pub const REPLACEMENT_SN_IN_TW: ColumnName = ColumnName("Replacement_SN_in_TW");
/// Historical misspelling kept: it is the physical column name of every stock table.
pub const STOCK_PRODUCT_NAME: ColumnName = ColumnName("Prodcut_name");

/// RMA partition (`<line>_RMA_record`)
#[derive(Debug, Clone, Copy)]
pub struct RmaSchema;

const RMA_COLUMNS: &[ColumnDef] = &[
    text("Rma_No"),
    text("Customer_Name"),
    text("Serial_No"),
    text("PN"),
    text("SKU"),
    text("Product_Name"),
    date("Sell_Ship_Date"),
    date("Create_Date"),
    date("Return_Date"),
    text("Failure_desc"),
    text("VI_Damage_Status"),
    text("Test_Result_Desc"),
    text("Replacement_SN_in_TW"),
    text("Replacement_PN_in_TW"),
    text("Replacement_SKU_in_TW"),
    text("Replacement_SN_from_HK"),
    text("Replacement_PN_from_HK"),
    text("Replacement_SKU_from_HK"),
    text("RMA_board_Test_Result"),
    date("End_user_invoice_date"),
    date("Warranty_Until"),
    text("Remark"),
];

const RMA_SEARCH_KEYS: &[SearchKey] = &[
    SearchKey { key: "serialNo", column: text("Serial_No"), op: MatchOp::Equals },
    SearchKey { key: "pn", column: text("PN"), op: MatchOp::Equals },
    SearchKey { key: "sku", column: text("SKU"), op: MatchOp::Equals },
    SearchKey { key: "rmaNo", column: text("Rma_No"), op: MatchOp::Equals },
    SearchKey { key: "customerName", column: text("Customer_Name"), op: MatchOp::Contains },
    SearchKey { key: "productName", column: text("Product_Name"), op: MatchOp::Contains },
    SearchKey { key: "startDate", column: date("Create_Date"), op: MatchOp::AtLeast },
    SearchKey { key: "endDate", column: date("Create_Date"), op: MatchOp::AtMost },
];

impl EntitySchema for RmaSchema {
    const KIND: EntityKind = EntityKind::Rma;
    const LABEL: &'static str = "RMA record";

    fn columns() -> &'static [ColumnDef] {
        RMA_COLUMNS
    }

    fn search_keys() -> &'static [SearchKey] {
        RMA_SEARCH_KEYS
    }

    fn keyword_columns() -> &'static [ColumnName] {
        &[SERIAL_NO, ColumnName("PN"), ColumnName("SKU")]
    }

    fn default_order() -> (ColumnName, SortOrder) {
        (CREATE_DATE, SortOrder::Desc)
    }
}

/// Stock partition (`<line>_buffer_stock`)
#[derive(Debug, Clone, Copy)]
pub struct StockSchema;

const STOCK_COLUMNS: &[ColumnDef] = &[
    text("Prodcut_name"),
    text("PN"),
    text("SKU"),
    text("Serial_No"),
];

const STOCK_SEARCH_KEYS: &[SearchKey] = &[
    SearchKey { key: "serialNo", column: text("Serial_No"), op: MatchOp::Equals },
    SearchKey { key: "pn", column: text("PN"), op: MatchOp::Equals },
    SearchKey { key: "sku", column: text("SKU"), op: MatchOp::Equals },
    SearchKey { key: "productName", column: text("Prodcut_name"), op: MatchOp::Contains },
];

impl EntitySchema for StockSchema {
    const KIND: EntityKind = EntityKind::Stock;
    const LABEL: &'static str = "stock record";

    fn columns() -> &'static [ColumnDef] {
        STOCK_COLUMNS
    }

    fn search_keys() -> &'static [SearchKey] {
        STOCK_SEARCH_KEYS
    }

    fn keyword_columns() -> &'static [ColumnName] {
        &[SERIAL_NO, ColumnName("PN"), ColumnName("SKU"), STOCK_PRODUCT_NAME]
    }

    fn default_order() -> (ColumnName, SortOrder) {
        (SERIAL_NO, SortOrder::Asc)
    }
}
