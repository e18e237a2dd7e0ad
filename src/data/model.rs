// ---------------------------------------------------------------------------
// DqBits – where the quality categories live inside a bitmask word
// ---------------------------------------------------------------------------

/// Short names of the bits the label is derived from.
pub const DATA_BIT: &str = "DATA";
pub const CBC_CAT_BITS: [&str; 3] = ["CBC_CAT1", "CBC_CAT2", "CBC_CAT3"];

/// Bit positions of the general validity bit and the three CBC categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DqBits {
    pub data: u32,
    pub cbc_cat: [u32; 3],
}

impl Default for DqBits {
    /// GWOSC layout: bit 0 `DATA`, bits 1..=3 `CBC_CAT1..3`.
    fn default() -> Self {
        Self {
            data: 0,
            cbc_cat: [1, 2, 3],
        }
    }
}

impl DqBits {
    /// Resolve bit positions from a file's short-name list.
    ///
    /// An empty list means the file does not name its bits, so the default
    /// layout applies. Returns the first required name that is missing.
    pub fn from_shortnames(names: &[String]) -> Result<Self, &'static str> {
        if names.is_empty() {
            return Ok(Self::default());
        }
        let position = |wanted: &'static str| {
            names
                .iter()
                .position(|n| n.trim() == wanted)
                .map(|p| p as u32)
                .ok_or(wanted)
        };
        Ok(Self {
            data: position(DATA_BIT)?,
            cbc_cat: [
                position(CBC_CAT_BITS[0])?,
                position(CBC_CAT_BITS[1])?,
                position(CBC_CAT_BITS[2])?,
            ],
        })
    }

    /// `DATA & (CAT1 | CAT2 | CAT3)` evaluated on one raw mask word.
    pub fn label(&self, mask: u64) -> u8 {
        let bit = |pos: u32| (mask.checked_shr(pos).unwrap_or(0) & 1) as u8;
        let any_cat = self.cbc_cat.iter().fold(0, |acc, &pos| acc | bit(pos));
        bit(self.data) & any_cat
    }
}

// ---------------------------------------------------------------------------
// DataFile – one parsed input file
// ---------------------------------------------------------------------------

/// Contents of a single data file before concatenation.
#[derive(Debug, Clone, Default)]
pub struct DataFile {
    /// Strain samples; undefined samples are `NaN`.
    pub strain: Vec<f64>,
    /// Names of the bitmask bits, in bit order. May be empty.
    pub dq_shortnames: Vec<String>,
    /// Raw quality bitmask words.
    pub dq_mask: Vec<u64>,
}

// ---------------------------------------------------------------------------
// GwData – the concatenated run input
// ---------------------------------------------------------------------------

/// Strain and derived labels of every file in the manifest, appended in
/// manifest order.
#[derive(Debug, Clone, Default)]
pub struct GwData {
    pub strain: Vec<f64>,
    /// Derived label (0 or 1) per bitmask entry.
    pub dq: Vec<u8>,
}

impl GwData {
    pub fn append(&mut self, file: &DataFile, bits: DqBits) {
        self.strain.extend_from_slice(&file.strain);
        self.dq
            .extend(file.dq_mask.iter().map(|&mask| bits.label(mask)));
    }
}

// ---------------------------------------------------------------------------
// TrainingTable – labeled per-second feature vectors
// ---------------------------------------------------------------------------

/// One usable second of strain paired with its quality label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSecond {
    pub time: usize,
    pub strain: Vec<f64>,
    pub label: u8,
}

/// Ordered by `time`. Every row's `strain` has exactly `width` samples.
#[derive(Debug, Clone)]
pub struct TrainingTable {
    pub rows: Vec<LabeledSecond>,
    pub width: usize,
}

impl TrainingTable {
    pub fn new(width: usize) -> Self {
        Self {
            rows: Vec::new(),
            width,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn features(&self) -> Vec<&[f64]> {
        self.rows.iter().map(|r| r.strain.as_slice()).collect()
    }

    pub fn labels(&self) -> Vec<u8> {
        self.rows.iter().map(|r| r.label).collect()
    }
}

// ---------------------------------------------------------------------------
// PredictionTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prediction {
    pub time: usize,
    pub label: u8,
}

/// Predicted labels, one per training row, in training order.
#[derive(Debug, Clone, Default)]
pub struct PredictionTable {
    pub rows: Vec<Prediction>,
}

impl PredictionTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn labels(&self) -> Vec<u8> {
        self.rows.iter().map(|p| p.label).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_requires_data_bit_and_any_category() {
        let bits = DqBits::default();
        assert_eq!(bits.label(0b0011), 1);
        assert_eq!(bits.label(0b0101), 1);
        assert_eq!(bits.label(0b1001), 1);
        assert_eq!(bits.label(0b1111), 1);
        // category set but DATA clear
        assert_eq!(bits.label(0b1110), 0);
        // DATA alone
        assert_eq!(bits.label(0b0001), 0);
        // burst categories do not count
        assert_eq!(bits.label(0b111_0001), 0);
        assert_eq!(bits.label(0), 0);
    }

    #[test]
    fn shortnames_reorder_bits() {
        let names: Vec<String> = ["CBC_CAT3", "DATA", "CBC_CAT1", "CBC_CAT2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let bits = DqBits::from_shortnames(&names).unwrap();
        assert_eq!(bits.data, 1);
        assert_eq!(bits.cbc_cat, [2, 3, 0]);
        // DATA (bit 1) + CBC_CAT3 (bit 0)
        assert_eq!(bits.label(0b0011), 1);
        assert_eq!(bits.label(0b0010), 0);
    }

    #[test]
    fn empty_shortnames_use_default_layout() {
        assert_eq!(DqBits::from_shortnames(&[]).unwrap(), DqBits::default());
    }

    #[test]
    fn missing_shortname_is_reported() {
        let names = vec!["DATA".to_string(), "CBC_CAT1".to_string()];
        assert_eq!(DqBits::from_shortnames(&names), Err("CBC_CAT2"));
    }

    #[test]
    fn append_concatenates_in_order() {
        let mut data = GwData::default();
        let a = DataFile {
            strain: vec![1.0, 2.0],
            dq_shortnames: vec![],
            dq_mask: vec![0b0011],
        };
        let b = DataFile {
            strain: vec![3.0, 4.0],
            dq_shortnames: vec![],
            dq_mask: vec![0b0001],
        };
        data.append(&a, DqBits::default());
        data.append(&b, DqBits::default());
        assert_eq!(data.strain, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(data.dq, vec![1, 0]);
    }
}
