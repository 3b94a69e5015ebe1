//! L3 — Point-Cloud Scale Probe: parses a PCD v0.7 header (ASCII or
//! little-endian binary float32, uncompressed), bounds-boxes up to
//! 100,000 points, and classifies the result (spec §4.3, scenario 3).

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use serde::Serialize;

const MAX_POINTS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleStatus {
    Optimal,
    WarningSmall,
    WarningLarge,
    WarningNarrow,
    ErrorTooSmall,
    ErrorTooLarge,
    NotFound,
    Error,
}

impl ScaleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScaleStatus::Optimal => "optimal",
            ScaleStatus::WarningSmall => "warning_small",
            ScaleStatus::WarningLarge => "warning_large",
            ScaleStatus::WarningNarrow => "warning_narrow",
            ScaleStatus::ErrorTooSmall => "error_too_small",
            ScaleStatus::ErrorTooLarge => "error_too_large",
            ScaleStatus::NotFound => "not_found",
            ScaleStatus::Error => "error",
        }
    }

    /// `not_found`/`error` degrade to a warning at the validator level
    /// rather than a hard failure (spec §4.3).
    pub fn is_fatal(self) -> bool {
        matches!(self, ScaleStatus::ErrorTooSmall | ScaleStatus::ErrorTooLarge)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaleProbeResult {
    pub status: ScaleStatus,
    pub width_m: f64,
    pub height_m: f64,
    pub depth_m: f64,
    pub area_sqm: f64,
    pub points_parsed: u64,
    pub error: Option<String>,
}

impl ScaleProbeResult {
    fn failed(status: ScaleStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            width_m: 0.0,
            height_m: 0.0,
            depth_m: 0.0,
            area_sqm: 0.0,
            points_parsed: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
}

struct Header {
    encoding: Encoding,
    fields: Vec<String>,
    sizes: Vec<usize>,
    counts: Vec<usize>,
    points: usize,
}

pub fn probe(path: &Path) -> ScaleProbeResult {
    if !path.exists() {
        return ScaleProbeResult::failed(ScaleStatus::NotFound, "preview point cloud not found");
    }

    match probe_inner(path) {
        Ok(result) => result,
        Err(message) => ScaleProbeResult::failed(ScaleStatus::Error, message),
    }
}

fn probe_inner(path: &Path) -> Result<ScaleProbeResult, String> {
    let file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    let mut reader = BufReader::new(file);
    let header = parse_header(&mut reader)?;

    let xi = header
        .fields
        .iter()
        .position(|f| f == "x")
        .ok_or("header has no x field")?;
    let yi = header
        .fields
        .iter()
        .position(|f| f == "y")
        .ok_or("header has no y field")?;
    let zi = header
        .fields
        .iter()
        .position(|f| f == "z")
        .ok_or("header has no z field")?;

    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    let mut parsed = 0u64;

    let limit = header.points.min(MAX_POINTS);

    match header.encoding {
        Encoding::Ascii => {
            for line in reader.lines() {
                if parsed as usize >= limit {
                    break;
                }
                let line = line.map_err(|e| e.to_string())?;
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() <= zi.max(yi).max(xi) {
                    continue;
                }
                let x: f64 = tokens[xi].parse().map_err(|_| "bad x value".to_string())?;
                let y: f64 = tokens[yi].parse().map_err(|_| "bad y value".to_string())?;
                let z: f64 = tokens[zi].parse().map_err(|_| "bad z value".to_string())?;
                accumulate(&mut min, &mut max, [x, y, z]);
                parsed += 1;
            }
        }
        Encoding::BinaryLittleEndian => {
            let point_stride: usize = header.sizes.iter().zip(&header.counts).map(|(s, c)| s * c).sum();
            if point_stride == 0 {
                return Err("zero-width binary point stride".to_string());
            }
            let field_offset = |idx: usize| -> usize {
                header.sizes[..idx]
                    .iter()
                    .zip(&header.counts[..idx])
                    .map(|(s, c)| s * c)
                    .sum()
            };
            let (xo, yo, zo) = (field_offset(xi), field_offset(yi), field_offset(zi));
            if header.sizes[xi] != 4 || header.sizes[yi] != 4 || header.sizes[zi] != 4 {
                return Err("only 32-bit float xyz fields are supported".to_string());
            }

            let mut buf = vec![0u8; point_stride];
            while (parsed as usize) < limit {
                match reader.read_exact(&mut buf) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                    Err(e) => return Err(e.to_string()),
                }
                let x = f32::from_le_bytes(buf[xo..xo + 4].try_into().unwrap()) as f64;
                let y = f32::from_le_bytes(buf[yo..yo + 4].try_into().unwrap()) as f64;
                let z = f32::from_le_bytes(buf[zo..zo + 4].try_into().unwrap()) as f64;
                accumulate(&mut min, &mut max, [x, y, z]);
                parsed += 1;
            }
        }
    }

    if parsed == 0 {
        return Err("no points parsed from point cloud".to_string());
    }

    let width = max[0] - min[0];
    let height = max[1] - min[1];
    let depth = max[2] - min[2];
    let area = width * height;
    let status = classify(width, height);

    Ok(ScaleProbeResult {
        status,
        width_m: width,
        height_m: height,
        depth_m: depth,
        area_sqm: area,
        points_parsed: parsed,
        error: None,
    })
}

fn accumulate(min: &mut [f64; 3], max: &mut [f64; 3], point: [f64; 3]) {
    for axis in 0..3 {
        if point[axis] < min[axis] {
            min[axis] = point[axis];
        }
        if point[axis] > max[axis] {
            max[axis] = point[axis];
        }
    }
}

/// Status taxonomy over the max of width/height (spec §4.3).
fn classify(width: f64, height: f64) -> ScaleStatus {
    let max_dim = width.max(height);
    let min_dim = width.min(height);

    if max_dim < 10.0 {
        return ScaleStatus::ErrorTooSmall;
    }
    if max_dim > 500.0 {
        return ScaleStatus::ErrorTooLarge;
    }
    if (10.0..50.0).contains(&max_dim) {
        return ScaleStatus::WarningSmall;
    }
    if max_dim > 200.0 {
        return ScaleStatus::WarningLarge;
    }
    if min_dim < 25.0 && (50.0..=200.0).contains(&max_dim) {
        return ScaleStatus::WarningNarrow;
    }
    if (50.0..=200.0).contains(&width) && (50.0..=200.0).contains(&height) {
        return ScaleStatus::Optimal;
    }
    ScaleStatus::WarningSmall
}

fn parse_header(reader: &mut BufReader<std::fs::File>) -> Result<Header, String> {
    let mut fields = Vec::new();
    let mut sizes = Vec::new();
    let mut counts = Vec::new();
    let mut points = 0usize;
    let mut encoding = Encoding::Ascii;
    let mut data_line_seen = false;

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).map_err(|e| e.to_string())?;
        if read == 0 {
            return Err("unexpected EOF while reading PCD header".to_string());
        }
        let trimmed = line.trim();
        let mut tokens = trimmed.split_whitespace();
        let Some(keyword) = tokens.next() else { continue };

        match keyword {
            "FIELDS" => fields = tokens.map(str::to_string).collect(),
            "SIZE" => {
                sizes = tokens
                    .map(|t| t.parse::<usize>().map_err(|_| "bad SIZE".to_string()))
                    .collect::<Result<_, _>>()?
            }
            "COUNT" => {
                counts = tokens
                    .map(|t| t.parse::<usize>().map_err(|_| "bad COUNT".to_string()))
                    .collect::<Result<_, _>>()?
            }
            "POINTS" => {
                points = tokens
                    .next()
                    .ok_or("missing POINTS value")?
                    .parse()
                    .map_err(|_| "bad POINTS value".to_string())?
            }
            "DATA" => {
                let kind = tokens.next().unwrap_or("ascii");
                encoding = match kind {
                    "ascii" => Encoding::Ascii,
                    "binary" => Encoding::BinaryLittleEndian,
                    "binary_compressed" => {
                        return Err("compressed binary PCD is unsupported".to_string())
                    }
                    other => return Err(format!("unknown DATA kind {other}")),
                };
                data_line_seen = true;
                break;
            }
            _ => {}
        }
    }

    if !data_line_seen {
        return Err("PCD header missing DATA line".to_string());
    }
    if fields.is_empty() {
        return Err("PCD header missing FIELDS".to_string());
    }
    if counts.is_empty() {
        counts = vec![1; fields.len()];
    }
    if sizes.is_empty() {
        sizes = vec![4; fields.len()];
    }

    Ok(Header {
        encoding,
        fields,
        sizes,
        counts,
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ascii_pcd(path: &Path, points: &[(f64, f64, f64)]) {
        let mut f = std::fs::File::create(path).unwrap();
        writeln!(f, "# .PCD v0.7").unwrap();
        writeln!(f, "FIELDS x y z").unwrap();
        writeln!(f, "SIZE 4 4 4").unwrap();
        writeln!(f, "TYPE F F F").unwrap();
        writeln!(f, "COUNT 1 1 1").unwrap();
        writeln!(f, "WIDTH {}", points.len()).unwrap();
        writeln!(f, "HEIGHT 1").unwrap();
        writeln!(f, "POINTS {}", points.len()).unwrap();
        writeln!(f, "DATA ascii").unwrap();
        for (x, y, z) in points {
            writeln!(f, "{x} {y} {z}").unwrap();
        }
    }

    #[test]
    fn optimal_bounding_box() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Preview.pcd");
        write_ascii_pcd(&path, &[(-50.0, -40.0, 0.0), (50.0, 40.0, 5.0)]);
        let result = probe(&path);
        assert_eq!(result.status, ScaleStatus::Optimal);
        assert!((result.width_m - 100.0).abs() < 1e-6);
        assert!((result.height_m - 80.0).abs() < 1e-6);
    }

    #[test]
    fn too_small_bounding_box() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Preview.pcd");
        write_ascii_pcd(&path, &[(-4.0, -2.5, 0.0), (4.0, 2.5, 1.0)]);
        let result = probe(&path);
        assert_eq!(result.status, ScaleStatus::ErrorTooSmall);
        assert!(result.status.is_fatal());
    }

    #[test]
    fn missing_file_is_not_found_and_not_fatal() {
        let result = probe(Path::new("/nonexistent/Preview.pcd"));
        assert_eq!(result.status, ScaleStatus::NotFound);
        assert!(!result.status.is_fatal());
    }
}
