//! Flat parallel-array network description.
//!
//! [`NetworkInput`] mirrors the DIE configuration image: a set of named
//! parallel arrays, each documented with the short key it comes from. All
//! element references in the input are **1-based** (the file format's
//! convention) and translated to 0-based during network construction; the
//! contingency-description offsets index the packed `outage_descriptors`
//! array, and the `complex_outages` / detailed-result tables reference
//! contingencies 0-based, matching the original stream layout.
//!
//! `validate` checks presence and length coherence across related arrays,
//! naming the offending key in the diagnostic.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The flat network image the engine is constructed from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInput {
    /// `CGNOMREG`: region names.
    #[serde(default)]
    pub region_names: Vec<String>,
    /// `CPPOSREG`: region of each node, 1-based.
    #[serde(default)]
    pub node_regions: Vec<i64>,

    /// `CQNOMQUA`: branch names.
    #[serde(default)]
    pub branch_names: Vec<String>,
    /// `TNNORQUA`: branch origin node, 1-based.
    #[serde(default)]
    pub branch_from: Vec<i64>,
    /// `TNNEXQUA`: branch extremity node, 1-based.
    #[serde(default)]
    pub branch_to: Vec<i64>,
    /// `CQADMITA`: per-unit admittance.
    #[serde(default)]
    pub branch_admittance: Vec<f64>,
    /// `CQRESIST`: resistance.
    #[serde(default)]
    pub branch_resistance: Vec<f64>,
    /// `QASURVDI`: basecase monitoring flag per branch.
    #[serde(default)]
    pub branch_monitor_n: Vec<i64>,
    /// `QASURNMK`: contingency monitoring flag per branch.
    #[serde(default)]
    pub branch_monitor_outage: Vec<i64>,
    /// `OPENBRAN`: 1-based ids of initially open branches.
    #[serde(default)]
    pub open_branches: Vec<i64>,

    /// `DTTRDEQU`: 1-based id of the branch carrying each phase-shifter.
    #[serde(default)]
    pub shifter_branch: Vec<i64>,
    /// `DTMODREG`: control mode flag.
    #[serde(default)]
    pub shifter_control: Vec<i64>,
    /// `DTVALDEP`: base shift angle (or power, per mode).
    #[serde(default)]
    pub shifter_base_value: Vec<f64>,
    /// `DTVALINF`: lower bound (angle or power, per mode).
    #[serde(default)]
    pub shifter_min_value: Vec<f64>,
    /// `DTVALSUP`: upper bound (angle or power, per mode).
    #[serde(default)]
    pub shifter_max_value: Vec<f64>,
    /// `DTLOWTAP`: number of the first tap.
    #[serde(default)]
    pub shifter_low_tap: Vec<i64>,
    /// `DTNBTAPS`: tap count per shifter.
    #[serde(default)]
    pub shifter_tap_count: Vec<i64>,
    /// `DTTAPDEP`: packed tap angles.
    #[serde(default)]
    pub shifter_tap_angles: Vec<f64>,
    /// `DTLOWRAN`: (1-based branch id, taps) pairs limiting downward
    /// preventive tap moves; `-1` terminates.
    #[serde(default)]
    pub shifter_tap_lower_range: Vec<i64>,
    /// `DTUPPRAN`: (1-based branch id, taps) pairs limiting upward
    /// preventive tap moves; `-1` terminates.
    #[serde(default)]
    pub shifter_tap_upper_range: Vec<i64>,
    /// `DTNBDEFK`: curative contingency count per shifter.
    #[serde(default)]
    pub shifter_curative_counts: Vec<i64>,
    /// `DTPTDEFK`: packed curative contingency indices, 0-based.
    #[serde(default)]
    pub shifter_curative_outages: Vec<i64>,

    /// `DCNOMQUA`: HVDC link names.
    #[serde(default)]
    pub hvdc_names: Vec<String>,
    /// `DCNORQUA`: origin node, 1-based.
    #[serde(default)]
    pub hvdc_from: Vec<i64>,
    /// `DCNEXQUA`: extremity node, 1-based.
    #[serde(default)]
    pub hvdc_to: Vec<i64>,
    /// `DCMINPUI`: minimum power.
    #[serde(default)]
    pub hvdc_pmin: Vec<f64>,
    /// `DCMAXPUI`: maximum power.
    #[serde(default)]
    pub hvdc_pmax: Vec<f64>,
    /// `DCIMPPUI`: power setpoint.
    #[serde(default)]
    pub hvdc_setpoint: Vec<f64>,
    /// `DCREGPUI`: control mode flag.
    #[serde(default)]
    pub hvdc_control: Vec<i64>,
    /// `DCDROOPK`: AC-emulation gain, MW per degree, one entry per
    /// emulated link.
    #[serde(default)]
    pub hvdc_emulation_gain: Vec<f64>,
    /// `DCNBDEFK`: curative contingency count per link.
    #[serde(default)]
    pub hvdc_curative_counts: Vec<i64>,
    /// `DCPTDEFK`: packed curative contingency indices, 0-based.
    #[serde(default)]
    pub hvdc_curative_outages: Vec<i64>,
    /// `DCPERST1`: sending-station loss coefficient.
    #[serde(default)]
    pub hvdc_loss_from: Vec<f64>,
    /// `DCPERST2`: receiving-station loss coefficient.
    #[serde(default)]
    pub hvdc_loss_to: Vec<f64>,
    /// `DCRESIST`: cable resistance.
    #[serde(default)]
    pub hvdc_resistance: Vec<f64>,
    /// `DCTENSDC`: cable voltage, kV.
    #[serde(default)]
    pub hvdc_voltage: Vec<f64>,

    /// `TRNOMTYP`: generator kind names.
    #[serde(default)]
    pub generator_kind_names: Vec<String>,
    /// `TRNOMGTH`: generator names.
    #[serde(default)]
    pub generator_names: Vec<String>,
    /// `TNNEURGT`: host node, 1-based.
    #[serde(default)]
    pub generator_node: Vec<i64>,
    /// `TRTYPGRP`: kind index per generator.
    #[serde(default)]
    pub generator_kind: Vec<i64>,
    /// `SPPACTGT`: target output.
    #[serde(default)]
    pub generator_target: Vec<f64>,
    /// `TRPUIMIN`: minimum output.
    #[serde(default)]
    pub generator_pmin: Vec<f64>,
    /// `TRVALPMD`: available maximum output.
    #[serde(default)]
    pub generator_pmax: Vec<f64>,
    /// `TRDEMBAN`: frequency-reserve half-band.
    #[serde(default)]
    pub generator_half_band: Vec<f64>,
    /// `SPIMPMOD`: adjustability flag.
    #[serde(default)]
    pub generator_adjustment: Vec<i64>,
    /// `GRNBDEFK`: curative contingency count per generator.
    #[serde(default)]
    pub generator_curative_counts: Vec<i64>,
    /// `GRPTDEFK`: packed curative contingency indices, 0-based.
    #[serde(default)]
    pub generator_curative_outages: Vec<i64>,

    /// `TNNOMNOE`: load names.
    #[serde(default)]
    pub load_names: Vec<String>,
    /// `TNNEUCEL`: host node, 1-based.
    #[serde(default)]
    pub load_node: Vec<i64>,
    /// `ESAFIACT`: load value.
    #[serde(default)]
    pub load_value: Vec<f64>,
    /// `TNVAPAL`: maximum preventive shed, percent.
    #[serde(default)]
    pub load_shed_percent: Vec<i64>,
    /// `TNVACOU`: preventive shed cost; `None` uses the configured
    /// failure cost.
    #[serde(default)]
    pub load_shed_cost: Vec<Option<f64>>,
    /// `LDNBDEFK`: curative contingency count per load.
    #[serde(default)]
    pub load_curative_counts: Vec<i64>,
    /// `LDPTDEFK`: packed curative contingency indices, 0-based.
    #[serde(default)]
    pub load_curative_outages: Vec<i64>,
    /// `LDCURPER`: curative shed percent, one entry per curative load.
    #[serde(default)]
    pub load_curative_percent: Vec<i64>,

    /// `DMNOMDEK`: contingency names (empty string: name canonically).
    #[serde(default)]
    pub outage_names: Vec<String>,
    /// `DMPTDEFK`: 1-based offset of each contingency in the descriptor
    /// stream.
    #[serde(default)]
    pub outage_offsets: Vec<i64>,
    /// `DMDESCRK`: packed descriptor stream: per contingency, a length
    /// word followed by (kind, 1-based id) pairs, kind ∈ {1 branch,
    /// 2 generator, 3 HVDC}.
    #[serde(default)]
    pub outage_descriptors: Vec<i64>,
    /// `PTDEFSPE`: 0-based indices of the complex contingencies.
    #[serde(default)]
    pub complex_outages: Vec<i64>,
    /// `PTDEFRES`: packed detailed-flow requests: (1-based branch id,
    /// count, 0-based contingency indices...).
    #[serde(default)]
    pub detailed_flow_table: Vec<i64>,
    /// `PTVARMAR`: packed detailed marginal-variation requests, same
    /// layout as `PTDEFRES`.
    #[serde(default)]
    pub detailed_marginal_table: Vec<i64>,

    /// `SECTNOMS`: watched-section names.
    #[serde(default)]
    pub section_names: Vec<String>,
    /// `SECTMAXN`: basecase limit per section.
    #[serde(default)]
    pub section_limit_n: Vec<f64>,
    /// `SECTNBQD`: term count per section.
    #[serde(default)]
    pub section_term_counts: Vec<i64>,
    /// `SECTTYPE`: packed term kinds, 1 branch / 3 HVDC.
    #[serde(default)]
    pub section_term_kinds: Vec<i64>,
    /// `SECTNUMQ`: packed term element ids, 1-based.
    #[serde(default)]
    pub section_term_ids: Vec<i64>,
    /// `SECTCOEF`: packed term weights.
    #[serde(default)]
    pub section_term_coeffs: Vec<f64>,

    /// `GBINDNOM`: coupled generator group names.
    #[serde(default)]
    pub gen_group_names: Vec<String>,
    /// `GBINDREF`: reference-variable flag per group.
    #[serde(default)]
    pub gen_group_reference: Vec<i64>,
    /// `GBINDDEF`: packed member lists: count, then 1-based generator
    /// ids.
    #[serde(default)]
    pub gen_group_members: Vec<i64>,
    /// `LBINDNOM`: coupled load group names.
    #[serde(default)]
    pub load_group_names: Vec<String>,
    /// `LBINDDEF`: packed member lists: count, then 1-based load ids.
    #[serde(default)]
    pub load_group_members: Vec<i64>,
}

impl NetworkInput {
    pub fn node_count(&self) -> usize {
        self.node_regions.len()
    }

    pub fn branch_count(&self) -> usize {
        self.branch_names.len()
    }

    pub fn outage_count(&self) -> usize {
        self.outage_offsets.len()
    }

    /// Length-coherence validation across related arrays. Diagnostics name
    /// the DIE key of the offending array.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |key: &'static str, actual: usize, expected: usize| {
            if actual != expected {
                Err(ConfigError::LengthMismatch {
                    key,
                    expected,
                    actual,
                })
            } else {
                Ok(())
            }
        };

        let n_branch = self.branch_count();
        check("TNNORQUA", self.branch_from.len(), n_branch)?;
        check("TNNEXQUA", self.branch_to.len(), n_branch)?;
        check("CQADMITA", self.branch_admittance.len(), n_branch)?;
        check("CQRESIST", self.branch_resistance.len(), n_branch)?;
        check("QASURVDI", self.branch_monitor_n.len(), n_branch)?;
        check("QASURNMK", self.branch_monitor_outage.len(), n_branch)?;

        let n_shifter = self.shifter_branch.len();
        check("DTMODREG", self.shifter_control.len(), n_shifter)?;
        check("DTVALDEP", self.shifter_base_value.len(), n_shifter)?;
        check("DTVALINF", self.shifter_min_value.len(), n_shifter)?;
        check("DTVALSUP", self.shifter_max_value.len(), n_shifter)?;
        let tap_total: usize = self.shifter_tap_count.iter().map(|&c| c.max(0) as usize).sum();
        check("DTTAPDEP", self.shifter_tap_angles.len(), tap_total)?;
        let shifter_cur: usize = self
            .shifter_curative_counts
            .iter()
            .map(|&c| c.max(0) as usize)
            .sum();
        check("DTPTDEFK", self.shifter_curative_outages.len(), shifter_cur)?;

        let n_hvdc = self.hvdc_names.len();
        check("DCNORQUA", self.hvdc_from.len(), n_hvdc)?;
        check("DCNEXQUA", self.hvdc_to.len(), n_hvdc)?;
        check("DCMINPUI", self.hvdc_pmin.len(), n_hvdc)?;
        check("DCMAXPUI", self.hvdc_pmax.len(), n_hvdc)?;
        check("DCIMPPUI", self.hvdc_setpoint.len(), n_hvdc)?;
        check("DCREGPUI", self.hvdc_control.len(), n_hvdc)?;

        let n_gen = self.generator_names.len();
        check("TNNEURGT", self.generator_node.len(), n_gen)?;
        check("TRTYPGRP", self.generator_kind.len(), n_gen)?;
        check("SPPACTGT", self.generator_target.len(), n_gen)?;
        check("TRPUIMIN", self.generator_pmin.len(), n_gen)?;
        check("TRVALPMD", self.generator_pmax.len(), n_gen)?;
        check("SPIMPMOD", self.generator_adjustment.len(), n_gen)?;

        let n_load = self.load_names.len();
        check("TNNEUCEL", self.load_node.len(), n_load)?;
        check("ESAFIACT", self.load_value.len(), n_load)?;

        let n_outage = self.outage_count();
        check("DMNOMDEK", self.outage_names.len(), n_outage)?;

        let n_section = self.section_names.len();
        check("SECTMAXN", self.section_limit_n.len(), n_section)?;
        check("SECTNBQD", self.section_term_counts.len(), n_section)?;
        let section_terms: usize = self.section_term_counts.iter().map(|&c| c.max(0) as usize).sum();
        check("SECTTYPE", self.section_term_kinds.len(), section_terms)?;
        check("SECTNUMQ", self.section_term_ids.len(), section_terms)?;
        check("SECTCOEF", self.section_term_coeffs.len(), section_terms)?;

        check("GBINDREF", self.gen_group_reference.len(), self.gen_group_names.len())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_validates() {
        assert!(NetworkInput::default().validate().is_ok());
    }

    #[test]
    fn test_length_mismatch_names_the_key() {
        let input = NetworkInput {
            branch_names: vec!["L1".into()],
            branch_from: vec![1],
            branch_to: vec![2],
            branch_admittance: vec![1.0],
            branch_resistance: vec![0.0],
            branch_monitor_n: vec![1],
            // missing QASURNMK entry
            ..NetworkInput::default()
        };
        let err = input.validate().unwrap_err();
        assert!(err.to_string().contains("QASURNMK"));
    }

    #[test]
    fn test_round_trips_through_json() {
        let input = NetworkInput {
            region_names: vec!["FR".into()],
            node_regions: vec![1, 1],
            branch_names: vec!["L1".into()],
            branch_from: vec![1],
            branch_to: vec![2],
            branch_admittance: vec![5.0],
            branch_resistance: vec![0.01],
            branch_monitor_n: vec![1],
            branch_monitor_outage: vec![1],
            ..NetworkInput::default()
        };
        let text = serde_json::to_string(&input).unwrap();
        let back: NetworkInput = serde_json::from_str(&text).unwrap();
        assert_eq!(back.branch_names, input.branch_names);
        assert_eq!(back.node_regions, input.node_regions);
        assert!(back.validate().is_ok());
    }
}
