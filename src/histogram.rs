//! Minimal histogramming layer standing in for the framework-side sink:
//! named histograms with underflow/overflow bins, filled by value and never
//! failing on out-of-range input.

use std::collections::BTreeMap;

use color_eyre::Report;
use eyre::bail;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use smallvec::SmallVec;

/// Axis description as it appears in the configuration file: either a
/// uniform binning or an explicit list of variable-width edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Uniform { bins: usize, min: f64, max: f64 },
    Variable { edges: Vec<f64> },
}

#[derive(Debug, Clone, Serialize)]
pub enum Axis {
    Uniform {
        n_bins: usize,
        min: f64,
        max: f64,
        bin_width: f64,
    },
    Variable {
        edges: Vec<f64>,
    },
}

impl Axis {
    pub fn new(spec: &AxisSpec) -> Result<Axis, Report> {
        match spec {
            AxisSpec::Uniform { bins, min, max } => {
                if *bins == 0 {
                    bail!("axis needs at least one bin");
                }
                if !min.is_finite() || !max.is_finite() || max <= min {
                    bail!("axis range [{}, {}) is not valid", min, max);
                }
                Ok(Axis::Uniform {
                    n_bins: *bins,
                    min: *min,
                    max: *max,
                    bin_width: (max - min) / *bins as f64,
                })
            }
            AxisSpec::Variable { edges } => {
                if edges.len() < 2 {
                    bail!("variable axis needs at least two edges");
                }
                if edges.iter().any(|e| !e.is_finite()) {
                    bail!("variable axis edges must be finite");
                }
                if edges.windows(2).any(|w| w[1] <= w[0]) {
                    bail!("variable axis edges must be strictly increasing");
                }
                Ok(Axis::Variable {
                    edges: edges.clone(),
                })
            }
        }
    }

    pub fn n_bins(&self) -> usize {
        match self {
            Axis::Uniform { n_bins, .. } => *n_bins,
            Axis::Variable { edges } => edges.len() - 1,
        }
    }

    /// Regular bin index for an in-range value; intervals are right-open.
    pub fn index(&self, value: f64) -> Option<usize> {
        match self {
            Axis::Uniform {
                n_bins,
                min,
                max,
                bin_width,
            } => {
                if value < *min || value >= *max {
                    None
                } else {
                    Some((((value - min) / bin_width) as usize).min(n_bins - 1))
                }
            }
            Axis::Variable { edges } => {
                if value < edges[0] || value >= edges[edges.len() - 1] {
                    None
                } else {
                    let index = edges
                        .binary_search_by(|probe| probe.total_cmp(&value))
                        .unwrap_or_else(|i| i - 1);
                    Some(index)
                }
            }
        }
    }

    /// Bin index including flow bins: 0 is underflow, n_bins + 1 is overflow.
    pub fn index_with_flow(&self, value: f64) -> usize {
        match self.index(value) {
            Some(i) => i + 1,
            None => {
                let lo = match self {
                    Axis::Uniform { min, .. } => *min,
                    Axis::Variable { edges } => edges[0],
                };
                if value < lo {
                    0
                } else {
                    self.n_bins() + 1
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Hist1 {
    axis: Axis,
    counts: Vec<f64>,
    entries: u64,
}

impl Hist1 {
    pub fn new(spec: &AxisSpec) -> Result<Self, Report> {
        let axis = Axis::new(spec)?;
        let counts = vec![0.0; axis.n_bins() + 2];
        Ok(Self {
            axis,
            counts,
            entries: 0,
        })
    }

    pub fn fill(&mut self, value: f64) {
        let i = self.axis.index_with_flow(value);
        self.counts[i] += 1.0;
        self.entries += 1;
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Content of a regular bin, flow bins excluded.
    pub fn bin_content(&self, bin: usize) -> f64 {
        self.counts[bin + 1]
    }

    pub fn content_at(&self, value: f64) -> f64 {
        self.counts[self.axis.index_with_flow(value)]
    }

    pub fn underflow(&self) -> f64 {
        self.counts[0]
    }

    pub fn overflow(&self) -> f64 {
        self.counts[self.axis.n_bins() + 1]
    }

    /// Integral of the regular bins with lower edge at or above `threshold`.
    /// Used for the summary table only, so uniform axes are enough.
    pub fn integral_below(&self, threshold: f64) -> f64 {
        let upper = self.axis.index_with_flow(threshold);
        if upper <= 1 {
            return 0.0;
        }
        self.counts[1..upper].iter().sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Hist2 {
    x_axis: Axis,
    y_axis: Axis,
    counts: Vec<f64>,
    entries: u64,
}

impl Hist2 {
    pub fn new(x_spec: &AxisSpec, y_spec: &AxisSpec) -> Result<Self, Report> {
        let x_axis = Axis::new(x_spec)?;
        let y_axis = Axis::new(y_spec)?;
        let counts = vec![0.0; (x_axis.n_bins() + 2) * (y_axis.n_bins() + 2)];
        Ok(Self {
            x_axis,
            y_axis,
            counts,
            entries: 0,
        })
    }

    fn flat_index(&self, x: f64, y: f64) -> usize {
        let ix = self.x_axis.index_with_flow(x);
        let iy = self.y_axis.index_with_flow(y);
        ix * (self.y_axis.n_bins() + 2) + iy
    }

    pub fn fill(&mut self, x: f64, y: f64) {
        let i = self.flat_index(x, y);
        self.counts[i] += 1.0;
        self.entries += 1;
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn content_at(&self, x: f64, y: f64) -> f64 {
        self.counts[self.flat_index(x, y)]
    }
}

type SparseKey = SmallVec<[u16; 4]>;

/// Sparse n-dimensional histogram (up to four axes); only touched bins are
/// stored, which keeps the high-resolution QA fills cheap.
#[derive(Debug, Clone)]
pub struct HistSparse {
    axes: Vec<Axis>,
    counts: BTreeMap<SparseKey, f64>,
    entries: u64,
}

impl HistSparse {
    pub fn new(specs: &[&AxisSpec]) -> Result<Self, Report> {
        if specs.is_empty() || specs.len() > 4 {
            bail!("sparse histogram supports one to four axes");
        }
        let axes = specs
            .iter()
            .map(|s| Axis::new(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            axes,
            counts: BTreeMap::new(),
            entries: 0,
        })
    }

    pub fn fill(&mut self, values: &[f64]) {
        if values.len() != self.axes.len() {
            return;
        }
        let key: SparseKey = self
            .axes
            .iter()
            .zip(values)
            .map(|(axis, &v)| axis.index_with_flow(v) as u16)
            .collect();
        *self.counts.entry(key).or_insert(0.0) += 1.0;
        self.entries += 1;
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn content_at(&self, values: &[f64]) -> f64 {
        let key: SparseKey = self
            .axes
            .iter()
            .zip(values)
            .map(|(axis, &v)| axis.index_with_flow(v) as u16)
            .collect();
        self.counts.get(&key).copied().unwrap_or(0.0)
    }
}

impl Serialize for HistSparse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bins: Vec<(Vec<u16>, f64)> = self
            .counts
            .iter()
            .map(|(k, &v)| (k.to_vec(), v))
            .collect();
        let mut st = serializer.serialize_struct("HistSparse", 3)?;
        st.serialize_field("axes", &self.axes)?;
        st.serialize_field("entries", &self.entries)?;
        st.serialize_field("bins", &bins)?;
        st.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum Histogram {
    H1(Hist1),
    H2(Hist2),
    Sparse(HistSparse),
}

/// Name-addressed histogram store. Fills are side effects that never fail:
/// out-of-range values land in flow bins, unknown names are dropped.
#[derive(Debug, Default, Serialize)]
pub struct HistogramRegistry {
    hists: BTreeMap<String, Histogram>,
}

impl HistogramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_h1(&mut self, name: &str, spec: &AxisSpec) -> Result<(), Report> {
        self.hists
            .insert(name.to_string(), Histogram::H1(Hist1::new(spec)?));
        Ok(())
    }

    pub fn add_h2(&mut self, name: &str, x: &AxisSpec, y: &AxisSpec) -> Result<(), Report> {
        self.hists
            .insert(name.to_string(), Histogram::H2(Hist2::new(x, y)?));
        Ok(())
    }

    pub fn add_sparse(&mut self, name: &str, specs: &[&AxisSpec]) -> Result<(), Report> {
        self.hists
            .insert(name.to_string(), Histogram::Sparse(HistSparse::new(specs)?));
        Ok(())
    }

    pub fn fill1(&mut self, name: &str, value: f64) {
        if let Some(Histogram::H1(h)) = self.hists.get_mut(name) {
            h.fill(value);
        }
    }

    pub fn fill2(&mut self, name: &str, x: f64, y: f64) {
        if let Some(Histogram::H2(h)) = self.hists.get_mut(name) {
            h.fill(x, y);
        }
    }

    pub fn fill_sparse(&mut self, name: &str, values: &[f64]) {
        if let Some(Histogram::Sparse(h)) = self.hists.get_mut(name) {
            h.fill(values);
        }
    }

    pub fn h1(&self, name: &str) -> Option<&Hist1> {
        match self.hists.get(name) {
            Some(Histogram::H1(h)) => Some(h),
            _ => None,
        }
    }

    pub fn h2(&self, name: &str) -> Option<&Hist2> {
        match self.hists.get(name) {
            Some(Histogram::H2(h)) => Some(h),
            _ => None,
        }
    }

    pub fn sparse(&self, name: &str) -> Option<&HistSparse> {
        match self.hists.get(name) {
            Some(Histogram::Sparse(h)) => Some(h),
            _ => None,
        }
    }
}
