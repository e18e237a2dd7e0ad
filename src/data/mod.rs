/// Data layer: core types, loading, and labeling.
///
/// Architecture:
/// ```text
///  manifest ── .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse files → GwData (strain + per-second DQ label)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  labeler  │  one-second windows, NaN gaps dropped → TrainingTable
///   └──────────┘
/// ```

pub mod labeler;
pub mod loader;
pub mod model;
