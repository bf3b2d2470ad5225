// Database module
// One LanceDB vector database per tenant, isolated by storage path

pub mod lancedb;

pub use self::lancedb::{
    DocumentIndex, FileSummary, FilesSummary, LanceTenants, SearchHit, TableInfo, TenantIndexes,
    validate_user_id,
};
