use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{AllocationError, Result};

const SOURCE_HEADER: &str = "Source Coordinates";
const TARGET_HEADER: &str = "Target Coordinates";

/// Generated coordinates are drawn from `[0, 80) x [0, 100)`.
const X_RANGE: std::ops::Range<f64> = 0.0..80.0;
const Y_RANGE: std::ops::Range<f64> = 0.0..100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub x: f64,
    pub y: f64,
}

impl Coords {
    pub fn distance(&self, other: &Coords) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Coordinates as written to instance files, two decimals each.
    fn key(&self) -> (i64, i64) {
        ((self.x * 100.0).round() as i64, (self.y * 100.0).round() as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VertexKind {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    #[serde(rename = "type")]
    pub kind: VertexKind,
    pub id: usize,
    pub coords: Coords,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub name: String,
    pub sources: Vec<Vertex>,
    pub targets: Vec<Vertex>,
}

impl Instance {
    pub fn new(name: impl Into<String>, sources: Vec<Coords>, targets: Vec<Coords>) -> Self {
        let vertices = |kind, coords: Vec<Coords>| {
            coords
                .into_iter()
                .enumerate()
                .map(|(id, coords)| Vertex { kind, id, coords })
                .collect()
        };
        Self {
            name: name.into(),
            sources: vertices(VertexKind::Source, sources),
            targets: vertices(VertexKind::Target, targets),
        }
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let buf = fs::read_to_string(path).map_err(io_error(path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(name, &buf)
    }

    /// Parses the plain-text instance format: a header line, the counts, the
    /// source block and the target block, each preceded by its title line.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self> {
        let name = name.into();
        debug!("starting initialization of instance {name}...");
        let lines: Vec<&str> = text.lines().collect();

        let counts = line_at(&lines, 1)?;
        let (num_sources, num_targets) = parse_counts(counts)?;

        expect_title(&lines, 2, SOURCE_HEADER)?;
        let sources = (0..num_sources)
            .map(|i| parse_coords(&lines, 3 + i))
            .collect::<Result<Vec<_>>>()?;

        expect_title(&lines, 3 + num_sources, TARGET_HEADER)?;
        let targets = (0..num_targets)
            .map(|j| parse_coords(&lines, 4 + num_sources + j))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(name, sources, targets))
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from("numSource numTargets\n");
        out.push_str(&format!("{} {}\n", self.num_sources(), self.num_targets()));
        out.push_str(SOURCE_HEADER);
        out.push('\n');
        for v in &self.sources {
            out.push_str(&format!("{:.2} {:.2}\n", v.coords.x, v.coords.y));
        }
        out.push_str(TARGET_HEADER);
        out.push('\n');
        for v in &self.targets {
            out.push_str(&format!("{:.2} {:.2}\n", v.coords.x, v.coords.y));
        }
        out.push_str("EOF");
        out
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AllocationError {
    let path = path.to_path_buf();
    move |source| AllocationError::Io { path, source }
}

fn format_error(line: usize, message: impl Into<String>) -> AllocationError {
    AllocationError::InstanceFormat {
        line: line + 1,
        message: message.into(),
    }
}

fn line_at<'a>(lines: &[&'a str], idx: usize) -> Result<&'a str> {
    lines
        .get(idx)
        .copied()
        .ok_or_else(|| format_error(idx, "unexpected end of file"))
}

fn expect_title(lines: &[&str], idx: usize, title: &str) -> Result<()> {
    let line = line_at(lines, idx)?;
    if line.trim() != title {
        return Err(format_error(idx, format!("expected '{title}', found '{}'", line.trim())));
    }
    Ok(())
}

fn parse_counts(line: &str) -> Result<(usize, usize)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [sources, targets] = fields[..] else {
        return Err(format_error(1, "expected '<numSource> <numTargets>'"));
    };
    let parse = |field: &str| {
        field
            .parse::<usize>()
            .map_err(|_| format_error(1, format!("'{field}' is not a count")))
    };
    Ok((parse(sources)?, parse(targets)?))
}

fn parse_coords(lines: &[&str], idx: usize) -> Result<Coords> {
    let line = line_at(lines, idx)?;
    let values = line
        .split_whitespace()
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| format_error(idx, format!("'{v}' is not a coordinate")))
        })
        .collect::<Result<Vec<_>>>()?;
    match values[..] {
        [x, y, ..] => Ok(Coords { x, y }),
        _ => Err(format_error(idx, "expected two coordinates")),
    }
}

/// Pairwise source-to-target costs, indexed `[source][target]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    rows: Vec<Vec<f64>>,
}

impl CostMatrix {
    /// Euclidean distances rounded to four decimals.
    pub fn from_instance(instance: &Instance) -> Self {
        let rows = instance
            .sources
            .iter()
            .map(|s| {
                instance
                    .targets
                    .iter()
                    .map(|t| round_to(s.coords.distance(&t.coords), 4))
                    .collect()
            })
            .collect();
        Self { rows }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let expected = rows.first().map(Vec::len).unwrap_or(0);
        if expected == 0 {
            return Err(AllocationError::EmptyCosts);
        }
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
            return Err(AllocationError::RaggedCosts {
                row,
                expected,
                found: r.len(),
            });
        }
        Ok(Self { rows })
    }

    pub fn num_sources(&self) -> usize {
        self.rows.len()
    }

    pub fn num_targets(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn cost(&self, source: usize, target: usize) -> f64 {
        self.rows[source][target]
    }

    pub fn row(&self, source: usize) -> &[f64] {
        &self.rows[source]
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn random_coords<R: Rng>(rng: &mut R) -> Coords {
    // Rounded the way instance files store them, so uniqueness survives a write.
    Coords {
        x: round_to(rng.gen_range(X_RANGE), 2),
        y: round_to(rng.gen_range(Y_RANGE), 2),
    }
}

/// Generates `count` instances sharing one set of source coordinates.
///
/// Coordinates are unique within an instance and no target sits on a source.
pub fn generate_instances<R: Rng>(
    num_sources: usize,
    num_targets: usize,
    count: usize,
    rng: &mut R,
) -> Vec<Instance> {
    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(num_sources);
    while sources.len() < num_sources {
        let c = random_coords(rng);
        if seen.insert(c.key()) {
            sources.push(c);
        }
    }

    (1..=count)
        .map(|k| {
            let mut taken = seen.clone();
            let mut targets = Vec::with_capacity(num_targets);
            while targets.len() < num_targets {
                let c = random_coords(rng);
                if taken.insert(c.key()) {
                    targets.push(c);
                }
            }
            Instance::new(
                format!("instance_{num_sources}_{num_targets}_{k}.txt"),
                sources.clone(),
                targets,
            )
        })
        .collect()
}

/// Writes instances under `<dir>/instance_<M>_<N>/`, returning the file paths.
pub fn write_instances(dir: &Path, instances: &[Instance]) -> Result<Vec<PathBuf>> {
    instances
        .iter()
        .map(|instance| {
            let folder = dir.join(format!(
                "instance_{}_{}",
                instance.num_sources(),
                instance.num_targets()
            ));
            fs::create_dir_all(&folder).map_err(io_error(&folder))?;
            let path = folder.join(&instance.name);
            fs::write(&path, instance.to_text()).map_err(io_error(&path))?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const SMALL: &str = "numSource numTargets
2 3
Source Coordinates
0.00 0.00
10.00 0.00
Target Coordinates
3.00 4.00
10.00 1.50
  1.00   1.00
EOF";

    #[test]
    fn parses_plain_text_instance() {
        let instance = Instance::parse("small.txt", SMALL).unwrap();
        assert_eq!(instance.num_sources(), 2);
        assert_eq!(instance.num_targets(), 3);
        assert_eq!(instance.sources[1].coords, Coords { x: 10.0, y: 0.0 });
        assert_eq!(instance.targets[2].id, 2);
        assert_eq!(instance.targets[2].kind, VertexKind::Target);
    }

    #[test]
    fn costs_are_rounded_distances() {
        let instance = Instance::parse("small.txt", SMALL).unwrap();
        let costs = CostMatrix::from_instance(&instance);
        assert_eq!(costs.cost(0, 0), 5.0);
        assert_eq!(costs.cost(1, 1), 1.5);
        // sqrt(2) to four decimals
        assert_eq!(costs.cost(0, 2), 1.4142);
        assert_eq!(costs.row(1).len(), 3);
    }

    #[test]
    fn reports_malformed_lines() {
        let missing_title = SMALL.replace("Target Coordinates", "Targets");
        match Instance::parse("bad", &missing_title) {
            Err(AllocationError::InstanceFormat { line, .. }) => assert_eq!(line, 6),
            other => panic!("unexpected {other:?}"),
        }

        let bad_coord = SMALL.replace("10.00 1.50", "10.00 abc");
        assert!(matches!(
            Instance::parse("bad", &bad_coord),
            Err(AllocationError::InstanceFormat { line: 8, .. })
        ));

        let truncated = "numSource numTargets\n1 2\nSource Coordinates\n0 0\nTarget Coordinates\n1 1\n";
        assert!(Instance::parse("short", truncated).is_err());
        assert!(Instance::parse("empty", "").is_err());
    }

    #[test]
    fn text_format_round_trips() {
        let instance = Instance::parse("small.txt", SMALL).unwrap();
        let again = Instance::parse("small.txt", &instance.to_text()).unwrap();
        assert_eq!(instance, again);
    }

    #[test]
    fn rejects_ragged_cost_rows() {
        assert!(matches!(
            CostMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]),
            Err(AllocationError::RaggedCosts { row: 1, expected: 2, found: 1 })
        ));
        assert!(matches!(
            CostMatrix::from_rows(vec![]),
            Err(AllocationError::EmptyCosts)
        ));
    }

    #[test]
    fn generated_instances_share_sources_and_never_overlap() {
        let mut rng = StdRng::seed_from_u64(7);
        let instances = generate_instances(3, 40, 2, &mut rng);
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].sources, instances[1].sources);
        assert_eq!(instances[1].name, "instance_3_40_2.txt");

        for instance in &instances {
            let mut keys = HashSet::new();
            for v in instance.sources.iter().chain(&instance.targets) {
                assert!(X_RANGE.contains(&v.coords.x) || v.coords.x == 80.0);
                assert!(keys.insert(v.coords.key()), "duplicate coordinate");
            }
        }
    }

    #[test]
    fn writes_instances_into_sized_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let instances = generate_instances(2, 5, 1, &mut rng);
        let paths = write_instances(dir.path(), &instances).unwrap();

        assert_eq!(paths[0], dir.path().join("instance_2_5").join("instance_2_5_1.txt"));
        let loaded = Instance::from_file(&paths[0]).unwrap();
        assert_eq!(loaded, instances[0]);
    }
}
