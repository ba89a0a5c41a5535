//! The variant file: `NT;<max-draws>` then `;`-separated records
//! `<variant>;<key>;<count>;<payload…>`.
//!
//! A record for an already-seen variant number extends that variant; an
//! empty key (or a zero count) creates or keeps an empty variant. Unknown
//! keys are errors. Reading a before-curative threshold record forces the
//! ITAM check on for the whole computation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

/// Variant number whose deltas rewrite the base shadows.
pub const BASE_VARIANT: i32 = -1;

/// The four generator cost columns a variant may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CostKind {
    /// `CTORDR`: raise cost in the network-free phase.
    UpWithoutNetwork,
    /// `COUBHR`: lower cost in the network-free phase.
    DownWithoutNetwork,
    /// `COUHAR`: raise cost in redispatch.
    UpRedispatch,
    /// `COUBAR`: lower cost in redispatch.
    DownRedispatch,
}

/// The ten threshold columns a variant may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThresholdKind {
    MaxN,
    MaxOutage,
    MaxOutageComplex,
    MaxBeforeCurative,
    MaxBeforeCurativeComplex,
    MaxNReverse,
    MaxOutageReverse,
    MaxOutageComplexReverse,
    MaxBeforeCurativeReverse,
    MaxBeforeCurativeComplexReverse,
}

/// One variant as read from the file: entity names, not yet resolved.
#[derive(Debug, Clone, Default)]
pub struct VariantConfig {
    pub num: i32,
    pub unavailable_generators: Vec<String>,
    /// Imposed generator outputs.
    pub generator_targets: Vec<(String, f64)>,
    pub generator_pmax: Vec<(String, f64)>,
    pub generator_pmin: Vec<(String, f64)>,
    pub costs: BTreeMap<CostKind, Vec<(String, f64)>>,
    pub loads: Vec<(String, f64)>,
    pub curative_shed_costs: Vec<(String, f64)>,
    pub unavailable_branches: Vec<String>,
    pub hvdc_pmin: Vec<(String, f64)>,
    pub hvdc_pmax: Vec<(String, f64)>,
    pub hvdc_setpoints: Vec<(String, f64)>,
    /// Phase-shifter tap numbers.
    pub shifter_taps: Vec<(String, i64)>,
    pub thresholds: BTreeMap<ThresholdKind, Vec<(String, f64)>>,
    /// Zonal balance targets adjusted through consumption.
    pub balances_consumption: Vec<(String, f64)>,
    /// Zonal balance targets adjusted through generation (merit order).
    pub balances_generation: Vec<(String, f64)>,
    pub probabilities: Vec<(String, f64)>,
    /// Recorded merit-order shuffle, kept as assertion input.
    pub random_order: Vec<String>,
}

impl VariantConfig {
    fn new(num: i32) -> Self {
        Self {
            num,
            ..Self::default()
        }
    }
}

/// Every variant of a file, keyed (and processed) by number.
#[derive(Debug, Clone, Default)]
pub struct VariantSet {
    pub max_draws: i64,
    pub variants: BTreeMap<i32, VariantConfig>,
    /// Set when the file carries before-curative thresholds.
    pub itam_forced: bool,
}

impl VariantSet {
    pub fn base(&self) -> Option<&VariantConfig> {
        self.variants.get(&BASE_VARIANT)
    }
}

pub fn read_variants_file(path: &Path) -> Result<VariantSet> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading variant file '{}'", path.display()))?;
    parse_variants(&text).with_context(|| format!("parsing variant file '{}'", path.display()))
}

pub fn parse_variants(text: &str) -> Result<VariantSet> {
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| anyhow!("empty variant file"))?;
    let mut fields = header.split(';');
    if fields.next().map(str::trim) != Some("NT") {
        bail!("variant file must start with an NT record");
    }
    let max_draws: i64 = fields
        .next()
        .ok_or_else(|| anyhow!("NT record without a draw count"))?
        .trim()
        .parse()
        .context("parsing the NT draw count")?;
    debug!(max_draws, "variant file header");

    let mut set = VariantSet {
        max_draws,
        ..VariantSet::default()
    };

    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split(';');
        let num: i32 = fields
            .next()
            .unwrap()
            .trim()
            .parse()
            .with_context(|| format!("variant number on line {}", line_no + 2))?;
        let variant = set
            .variants
            .entry(num)
            .or_insert_with(|| VariantConfig::new(num));

        let Some(key) = fields.next() else {
            continue; // empty variant
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let count: usize = fields
            .next()
            .ok_or_else(|| anyhow!("record '{}' without a count on line {}", key, line_no + 2))?
            .trim()
            .parse()
            .with_context(|| format!("count of record '{}' on line {}", key, line_no + 2))?;
        if count == 0 {
            continue;
        }

        let mut itam = false;
        process_record(variant, key, count, &mut fields, &mut itam)
            .with_context(|| format!("record '{}' on line {}", key, line_no + 2))?;
        set.itam_forced |= itam;
    }
    Ok(set)
}

fn process_record<'a>(
    variant: &mut VariantConfig,
    key: &str,
    count: usize,
    fields: &mut impl Iterator<Item = &'a str>,
    itam: &mut bool,
) -> Result<()> {
    let next_name = |fields: &mut dyn Iterator<Item = &'a str>| -> Result<String> {
        fields
            .next()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("record ends before its announced count"))
    };
    let next_f64 = |fields: &mut dyn Iterator<Item = &'a str>| -> Result<f64> {
        fields
            .next()
            .ok_or_else(|| anyhow!("record ends before its announced count"))?
            .trim()
            .parse()
            .map_err(|e| anyhow!("bad numeric value: {e}"))
    };
    let next_i64 = |fields: &mut dyn Iterator<Item = &'a str>| -> Result<i64> {
        fields
            .next()
            .ok_or_else(|| anyhow!("record ends before its announced count"))?
            .trim()
            .parse()
            .map_err(|e| anyhow!("bad integer value: {e}"))
    };

    for _ in 0..count {
        match key {
            "PRODIN" => variant.unavailable_generators.push(next_name(fields)?),
            "QUADIN" => variant.unavailable_branches.push(next_name(fields)?),
            "GROURAND" => variant.random_order.push(next_name(fields)?),
            "PRODIM" => {
                let name = next_name(fields)?;
                variant.generator_targets.push((name, next_f64(fields)?));
            }
            "TRVALPMD" => {
                let name = next_name(fields)?;
                variant.generator_pmax.push((name, next_f64(fields)?));
            }
            "TRPUIMIN" => {
                let name = next_name(fields)?;
                variant.generator_pmin.push((name, next_f64(fields)?));
            }
            "CONELE" => {
                let name = next_name(fields)?;
                variant.loads.push((name, next_f64(fields)?));
            }
            "COUEFF" => {
                let name = next_name(fields)?;
                variant.curative_shed_costs.push((name, next_f64(fields)?));
            }
            "CTORDR" | "COUBHR" | "COUHAR" | "COUBAR" => {
                let kind = match key {
                    "CTORDR" => CostKind::UpWithoutNetwork,
                    "COUBHR" => CostKind::DownWithoutNetwork,
                    "COUHAR" => CostKind::UpRedispatch,
                    _ => CostKind::DownRedispatch,
                };
                let name = next_name(fields)?;
                let value = next_f64(fields)?;
                variant.costs.entry(kind).or_default().push((name, value));
            }
            "DCMINPUI" => {
                let name = next_name(fields)?;
                variant.hvdc_pmin.push((name, next_f64(fields)?));
            }
            "DCMAXPUI" => {
                let name = next_name(fields)?;
                variant.hvdc_pmax.push((name, next_f64(fields)?));
            }
            "DCIMPPUI" => {
                let name = next_name(fields)?;
                variant.hvdc_setpoints.push((name, next_f64(fields)?));
            }
            "DTVALDEP" => {
                let name = next_name(fields)?;
                variant.shifter_taps.push((name, next_i64(fields)?));
            }
            "ECHANG" => {
                let name = next_name(fields)?;
                variant.balances_consumption.push((name, next_f64(fields)?));
            }
            "ECHANGP" => {
                let name = next_name(fields)?;
                variant.balances_generation.push((name, next_f64(fields)?));
            }
            "PROBABINC" => {
                let name = next_name(fields)?;
                variant.probabilities.push((name, next_f64(fields)?));
            }
            "QATI00MN" | "QATI5MNS" | "QATI20MN" | "QATITAMN" | "QATITAMK" | "QATI00MN2"
            | "QATI5MNS2" | "QATI20MN2" | "QATITAMN2" | "QATITAMK2" => {
                let kind = match key {
                    "QATI00MN" => ThresholdKind::MaxN,
                    "QATI5MNS" => ThresholdKind::MaxOutage,
                    "QATI20MN" => ThresholdKind::MaxOutageComplex,
                    "QATITAMN" => ThresholdKind::MaxBeforeCurative,
                    "QATITAMK" => ThresholdKind::MaxBeforeCurativeComplex,
                    "QATI00MN2" => ThresholdKind::MaxNReverse,
                    "QATI5MNS2" => ThresholdKind::MaxOutageReverse,
                    "QATI20MN2" => ThresholdKind::MaxOutageComplexReverse,
                    "QATITAMN2" => ThresholdKind::MaxBeforeCurativeReverse,
                    _ => ThresholdKind::MaxBeforeCurativeComplexReverse,
                };
                if matches!(
                    kind,
                    ThresholdKind::MaxBeforeCurative
                        | ThresholdKind::MaxBeforeCurativeComplex
                        | ThresholdKind::MaxBeforeCurativeReverse
                        | ThresholdKind::MaxBeforeCurativeComplexReverse
                ) {
                    *itam = true;
                }
                let name = next_name(fields)?;
                let value = next_f64(fields)?;
                variant.thresholds.entry(kind).or_default().push((name, value));
            }
            other => bail!("unknown variant law '{other}'"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_simple_records() {
        let text = "NT;3\n\
                    0;PRODIM;2;G1;120.5;G2;80;\n\
                    0;CONELE;1;LOAD_A;95\n\
                    1;QUADIN;1;LINE_X\n";
        let set = parse_variants(text).unwrap();
        assert_eq!(set.max_draws, 3);
        assert_eq!(set.variants.len(), 2);
        let v0 = &set.variants[&0];
        assert_eq!(v0.generator_targets, vec![("G1".into(), 120.5), ("G2".into(), 80.0)]);
        assert_eq!(v0.loads, vec![("LOAD_A".into(), 95.0)]);
        assert_eq!(set.variants[&1].unavailable_branches, vec!["LINE_X".to_string()]);
    }

    #[test]
    fn test_records_extend_the_same_variant() {
        let text = "NT;1\n\
                    2;PRODIN;1;G1\n\
                    2;PRODIN;1;G2\n";
        let set = parse_variants(text).unwrap();
        assert_eq!(
            set.variants[&2].unavailable_generators,
            vec!["G1".to_string(), "G2".to_string()]
        );
    }

    #[test]
    fn test_base_variant_and_empty_variant() {
        let text = "NT;1\n\
                    -1;QATI00MN;1;LINE_A;400\n\
                    5\n";
        let set = parse_variants(text).unwrap();
        let base = set.base().expect("base variant");
        assert_eq!(base.thresholds[&ThresholdKind::MaxN], vec![("LINE_A".into(), 400.0)]);
        // variant 5 exists with no deltas
        assert!(set.variants[&5].unavailable_generators.is_empty());
        assert!(!set.itam_forced);
    }

    #[test]
    fn test_before_curative_threshold_forces_itam() {
        let text = "NT;1\n0;QATITAMN;1;LINE_A;350\n";
        let set = parse_variants(text).unwrap();
        assert!(set.itam_forced);
        assert_eq!(
            set.variants[&0].thresholds[&ThresholdKind::MaxBeforeCurative],
            vec![("LINE_A".into(), 350.0)]
        );
    }

    #[test]
    fn test_cost_records_map_to_their_column() {
        let text = "NT;1\n\
                    0;CTORDR;1;G1;12\n\
                    0;COUBHR;1;G1;3\n\
                    0;COUHAR;1;G1;24\n\
                    0;COUBAR;1;G1;6\n";
        let set = parse_variants(text).unwrap();
        let costs = &set.variants[&0].costs;
        assert_eq!(costs[&CostKind::UpWithoutNetwork][0].1, 12.0);
        assert_eq!(costs[&CostKind::DownWithoutNetwork][0].1, 3.0);
        assert_eq!(costs[&CostKind::UpRedispatch][0].1, 24.0);
        assert_eq!(costs[&CostKind::DownRedispatch][0].1, 6.0);
    }

    #[test]
    fn test_unknown_law_is_an_error() {
        let text = "NT;1\n0;NOSUCH;1;X;1\n";
        assert!(parse_variants(text).is_err());
    }

    #[test]
    fn test_missing_header_is_an_error() {
        assert!(parse_variants("0;PRODIN;1;G1\n").is_err());
    }

    #[test]
    fn test_read_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "NT;1").unwrap();
        writeln!(file, "0;ECHANGP;1;R1;-50").unwrap();
        let set = read_variants_file(file.path()).unwrap();
        assert_eq!(set.variants[&0].balances_generation, vec![("R1".into(), -50.0)]);
    }
}
