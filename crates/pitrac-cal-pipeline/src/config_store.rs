//! `golf_sim_config.json` persistence.
//!
//! The launch monitor reads its configuration through a property tree that
//! stores every scalar as a JSON string, so calibration values are written as
//! strings (`"5.5"`, `["1.2", "-3.4"]`). The rest of the document is kept
//! untouched and in its original key order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use pitrac_cal_core::{
    expected_ball_radius_px_at_40cm, CameraAngles, CameraId, ExtrinsicResult, IntrinsicResult,
    Mat3, Real, ReferencePosition, RigType, SensorSpec,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::ConfigStore;

pub const CONFIG_FILE_NAME: &str = "golf_sim_config.json";

/// Value format used by the launch monitor's config reader.
pub fn float_to_config_str(value: Real) -> String {
    format!("{value}")
}

fn config_str_to_float(value: &Value) -> Option<Real> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn config_str_to_int(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Presence of one calibration key at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageItem {
    pub key: String,
    pub present: bool,
    /// What the launch monitor uses when the key is missing.
    pub fallback: &'static str,
}

impl CoverageItem {
    pub fn status(&self) -> &'static str {
        if self.present {
            "present"
        } else {
            "missing"
        }
    }
}

/// [`ConfigStore`] backed by a JSON file.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
    doc: Value,
    sensor: SensorSpec,
}

impl JsonConfigStore {
    /// Locate the configuration file: `explicit` if given, otherwise
    /// `$PITRAC_ROOT/src/golf_sim_config.json` when it exists.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        let root = std::env::var_os("PITRAC_ROOT")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::resolve_path_with_root(explicit, root.as_deref())
    }

    pub fn resolve_path_with_root(explicit: Option<&Path>, root: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return fs::canonicalize(path)
                .with_context(|| format!("config file {} not found", path.display()));
        }
        if let Some(root) = root {
            let candidate = root.join("src").join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return fs::canonicalize(&candidate)
                    .with_context(|| format!("resolving {}", candidate.display()));
            }
        }
        bail!("cannot find {CONFIG_FILE_NAME}; pass --config or set PITRAC_ROOT")
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let doc: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!("config loaded from {}", path.display());
        Ok(Self::from_value(path, doc))
    }

    pub fn from_value(path: impl Into<PathBuf>, doc: Value) -> Self {
        Self {
            path: path.into(),
            doc,
            sensor: SensorSpec::default(),
        }
    }

    /// Sensor used to derive the expected ball radius on extrinsic save.
    pub fn with_sensor(mut self, sensor: SensorSpec) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Value {
        &self.doc
    }

    /// Back up the file on disk, then write the document over it.
    ///
    /// Returns the backup path.
    pub fn save(&self) -> Result<PathBuf> {
        let backup = self.create_backup()?;
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.doc.serialize(&mut ser).context("serializing config")?;
        out.push(b'\n');
        fs::write(&self.path, out).with_context(|| format!("writing {}", self.path.display()))?;
        Ok(backup)
    }

    fn create_backup(&self) -> Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let backup = PathBuf::from(format!("{}_BACKUP_{stamp}.json", self.path.display()));
        fs::copy(&self.path, &backup).with_context(|| {
            format!(
                "backing up {} to {}",
                self.path.display(),
                backup.display()
            )
        })?;
        Ok(backup)
    }

    fn section(&self, name: &str) -> Result<&Map<String, Value>> {
        self.doc
            .get("gs_config")
            .and_then(|g| g.get(name))
            .and_then(Value::as_object)
            .ok_or_else(|| anyhow!("missing gs_config.{name} section"))
    }

    fn section_mut(&mut self, name: &str) -> Result<&mut Map<String, Value>> {
        let root = self
            .doc
            .as_object_mut()
            .context("config root is not a JSON object")?;
        root.entry("gs_config")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .context("gs_config is not a JSON object")?
            .entry(name)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .with_context(|| format!("gs_config.{name} is not a JSON object"))
    }

    fn set_camera_value(&mut self, key: String, value: Value) -> Result<()> {
        self.section_mut("cameras")?.insert(key, value);
        Ok(())
    }

    pub fn rig_type(&self) -> Result<RigType> {
        let raw = self
            .section("calibration")?
            .get("kCalibrationRigType")
            .context("missing kCalibrationRigType")?;
        let selector = config_str_to_int(raw)
            .with_context(|| format!("kCalibrationRigType is not an integer: {raw}"))?;
        Ok(RigType::try_from(selector)?)
    }

    pub fn set_focal_length(&mut self, camera: CameraId, focal_mm: Real) -> Result<()> {
        self.set_camera_value(
            focal_length_key(camera),
            Value::String(float_to_config_str(focal_mm)),
        )
    }

    pub fn set_camera_angles(&mut self, camera: CameraId, angles: &CameraAngles) -> Result<()> {
        self.set_camera_value(
            angles_key(camera),
            string_array(&[angles.yaw_deg, angles.pitch_deg]),
        )
    }

    pub fn set_calibration_matrix(&mut self, camera: CameraId, k: &Mat3) -> Result<()> {
        let rows = (0..3)
            .map(|r| string_array(&[k[(r, 0)], k[(r, 1)], k[(r, 2)]]))
            .collect();
        self.set_camera_value(calibration_matrix_key(camera), Value::Array(rows))
    }

    pub fn set_distortion_vector(&mut self, camera: CameraId, coeffs: &[Real; 5]) -> Result<()> {
        self.set_camera_value(distortion_key(camera), string_array(coeffs))
    }

    /// Store the radius a ball of `ball_radius_m` has at 40 cm through a lens
    /// of `focal_mm`; returns it.
    pub fn set_expected_ball_radius_at_40cm(
        &mut self,
        camera: CameraId,
        focal_mm: Real,
        ball_radius_m: Real,
    ) -> Result<i64> {
        let radius = expected_ball_radius_px_at_40cm(focal_mm, ball_radius_m, &self.sensor);
        self.set_camera_value(
            expected_radius_key(camera),
            Value::String(radius.to_string()),
        )?;
        Ok(radius)
    }

    /// Current values of the calibration keys of `camera`, in display order.
    /// Missing keys map to `None`.
    pub fn calibration_values(&self, camera: CameraId) -> Vec<(String, Option<Value>)> {
        let cameras = self.section("cameras").ok();
        calibration_keys(camera)
            .into_iter()
            .map(|(key, _)| {
                let value = cameras.and_then(|c| c.get(&key)).cloned();
                (key, value)
            })
            .collect()
    }

    /// Which calibration keys of `camera` are set.
    pub fn startup_coverage(&self, camera: CameraId) -> Vec<CoverageItem> {
        let cameras = self.section("cameras").ok();
        calibration_keys(camera)
            .into_iter()
            .map(|(key, fallback)| CoverageItem {
                present: cameras.is_some_and(|c| c.contains_key(&key)),
                key,
                fallback,
            })
            .collect()
    }

    pub fn log_calibration_values(&self, camera: CameraId, title: &str) {
        info!("{title}");
        for (key, value) in self.calibration_values(camera) {
            match value {
                Some(value) => info!("gs_config.cameras.{key}={value}"),
                None => info!("gs_config.cameras.{key}=<missing>"),
            }
        }
    }

    pub fn log_startup_coverage(&self, camera: CameraId) {
        info!("calibration startup coverage for {camera}:");
        for item in self.startup_coverage(camera) {
            info!(
                "{} -> {} (fallback: {})",
                item.key,
                item.status(),
                item.fallback
            );
        }
    }

    fn write_intrinsics(&mut self, camera: CameraId, result: &IntrinsicResult) -> Result<()> {
        self.set_calibration_matrix(camera, &result.camera_matrix)?;
        self.set_distortion_vector(camera, &result.distortion)
    }

    fn write_extrinsics(&mut self, camera: CameraId, result: &ExtrinsicResult) -> Result<()> {
        self.set_focal_length(camera, result.focal_length_mm)?;
        self.set_camera_angles(camera, &result.angles)?;
        self.set_expected_ball_radius_at_40cm(
            camera,
            result.focal_length_mm,
            result.ball_radius_m,
        )?;
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn reference_position(&self, camera: CameraId) -> Result<ReferencePosition> {
        let rig = self.rig_type()?;
        let key = reference_position_key(rig, camera);
        let raw = self
            .section("calibration")?
            .get(&key)
            .with_context(|| format!("missing gs_config.calibration.{key}"))?;
        let values = raw
            .as_array()
            .filter(|v| v.len() == 3)
            .with_context(|| format!("{key} must be a 3-element array"))?
            .iter()
            .map(config_str_to_float)
            .collect::<Option<Vec<_>>>()
            .with_context(|| format!("{key} contains a non-numeric value"))?;
        Ok(ReferencePosition::new(values[0], values[1], values[2]))
    }

    fn save_intrinsics(&mut self, camera: CameraId, result: &IntrinsicResult) -> Result<PathBuf> {
        self.write_intrinsics(camera, result)?;
        let backup = self.save()?;
        info!(
            "saved intrinsic calibration to {} (backup: {})",
            self.path.display(),
            backup.display()
        );
        self.log_calibration_values(camera, "saved intrinsic calibration outcome:");
        Ok(backup)
    }

    fn save_extrinsics(&mut self, camera: CameraId, result: &ExtrinsicResult) -> Result<PathBuf> {
        self.write_extrinsics(camera, result)?;
        let backup = self.save()?;
        info!(
            "saved extrinsic calibration to {} (backup: {})",
            self.path.display(),
            backup.display()
        );
        self.log_calibration_values(camera, "saved extrinsic calibration outcome:");
        Ok(backup)
    }
}

fn string_array(values: &[Real]) -> Value {
    Value::Array(
        values
            .iter()
            .map(|v| Value::String(float_to_config_str(*v)))
            .collect(),
    )
}

pub fn focal_length_key(camera: CameraId) -> String {
    format!("kCamera{}FocalLength", camera.number())
}

pub fn angles_key(camera: CameraId) -> String {
    format!("kCamera{}Angles", camera.number())
}

pub fn calibration_matrix_key(camera: CameraId) -> String {
    format!("kCamera{}CalibrationMatrix", camera.number())
}

pub fn distortion_key(camera: CameraId) -> String {
    format!("kCamera{}DistortionVector", camera.number())
}

pub fn expected_radius_key(camera: CameraId) -> String {
    format!("kExpectedBallRadiusPixelsAt40cmCamera{}", camera.number())
}

pub fn reference_position_key(rig: RigType, camera: CameraId) -> String {
    let n = camera.number();
    match rig {
        RigType::StraightForward => {
            format!("kAutoCalibrationBaselineBallPositionFromCamera{n}MetersForStraightOutCameras")
        }
        RigType::SkewedCamera1 => {
            format!("kAutoCalibrationBaselineBallPositionFromCamera{n}MetersForSkewedCameras")
        }
        RigType::Custom => format!("kCustomCalibrationRigPositionFromCamera{n}"),
    }
}

fn calibration_keys(camera: CameraId) -> Vec<(String, &'static str)> {
    vec![
        (calibration_matrix_key(camera), "no undistortion"),
        (distortion_key(camera), "no undistortion"),
        (focal_length_key(camera), "built-in lens default"),
        (angles_key(camera), "zero mounting angles"),
        (expected_radius_key(camera), "derived from focal length"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn sample_doc() -> Value {
        json!({
            "gs_config": {
                "cameras": {
                    "kCamera1FocalLength": "5.8675451035986486",
                    "kCamera2FocalLength": "5.5107136256866491"
                },
                "calibration": {
                    "kCalibrationRigType": "2",
                    "kCustomCalibrationRigPositionFromCamera1": ["0.1", "0.2", "0.3"],
                    "kAutoCalibrationBaselineBallPositionFromCamera1MetersForStraightOutCameras": ["-0.120", "-0.28", "0.44"],
                    "kAutoCalibrationBaselineBallPositionFromCamera2MetersForSkewedCameras": ["0.00", "0.095", "0.435"]
                }
            }
        })
    }

    fn store_with_rig(rig: &str) -> JsonConfigStore {
        let mut doc = sample_doc();
        doc["gs_config"]["calibration"]["kCalibrationRigType"] = json!(rig);
        JsonConfigStore::from_value("unused.json", doc)
    }

    #[test]
    fn config_strings_are_shortest_round_trip() {
        assert_eq!(float_to_config_str(0.0), "0");
        assert_eq!(float_to_config_str(1.0), "1");
        let v = -0.5088115166383071;
        assert_eq!(float_to_config_str(v).parse::<f64>().unwrap(), v);
    }

    #[test]
    fn reference_position_per_rig_type() {
        let straight = store_with_rig("1")
            .reference_position(CameraId::One)
            .unwrap();
        assert_eq!(straight, ReferencePosition::new(-0.12, -0.28, 0.44));

        let skewed = store_with_rig("2")
            .reference_position(CameraId::Two)
            .unwrap();
        assert_eq!(skewed, ReferencePosition::new(0.0, 0.095, 0.435));

        let custom = store_with_rig("3")
            .reference_position(CameraId::One)
            .unwrap();
        assert_eq!(custom, ReferencePosition::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn unknown_rig_type_is_an_error() {
        let err = store_with_rig("99")
            .reference_position(CameraId::One)
            .unwrap_err();
        assert!(err.to_string().contains("unknown calibration rig type: 99"));
    }

    #[test]
    fn fractional_rig_type_is_rejected() {
        let err = store_with_rig("1.5").rig_type().unwrap_err();
        assert!(err.to_string().contains("not an integer"));

        let mut doc = sample_doc();
        doc["gs_config"]["calibration"]["kCalibrationRigType"] = json!(1.5);
        assert!(JsonConfigStore::from_value("unused.json", doc)
            .rig_type()
            .is_err());

        let mut doc = sample_doc();
        doc["gs_config"]["calibration"]["kCalibrationRigType"] = json!(3);
        assert_eq!(
            JsonConfigStore::from_value("unused.json", doc)
                .rig_type()
                .unwrap(),
            RigType::Custom
        );
    }

    #[test]
    fn angles_are_written_as_strings() {
        let mut store = JsonConfigStore::from_value("unused.json", sample_doc());
        store
            .set_camera_angles(
                CameraId::One,
                &CameraAngles {
                    yaw_deg: 2.5,
                    pitch_deg: -26.0,
                },
            )
            .unwrap();
        assert_eq!(
            store.document()["gs_config"]["cameras"]["kCamera1Angles"],
            json!(["2.5", "-26"])
        );
    }

    #[test]
    fn expected_radius_key_holds_integer_string() {
        let mut store = JsonConfigStore::from_value("unused.json", sample_doc());
        let radius = store
            .set_expected_ball_radius_at_40cm(CameraId::Two, 5.5, 0.021335)
            .unwrap();
        let expected: f64 = 5.5 * 0.021335 * 1456.0 / (0.4 * 5.077365371);
        assert_relative_eq!(radius as f64, expected.round());
        assert_eq!(
            store.document()["gs_config"]["cameras"]["kExpectedBallRadiusPixelsAt40cmCamera2"],
            json!(radius.to_string())
        );
    }

    #[test]
    fn persisted_radius_follows_result_ball_size() {
        let mut store = JsonConfigStore::from_value("unused.json", sample_doc());
        let result = ExtrinsicResult {
            focal_length_mm: 5.5,
            angles: CameraAngles {
                yaw_deg: 0.0,
                pitch_deg: 0.0,
            },
            ball_radius_m: 2.0 * 0.021335,
        };
        store.write_extrinsics(CameraId::Two, &result).unwrap();
        let standard = expected_ball_radius_px_at_40cm(5.5, 0.021335, &SensorSpec::default());
        let doubled = expected_ball_radius_px_at_40cm(5.5, 2.0 * 0.021335, &SensorSpec::default());
        assert!(doubled > standard);
        assert_eq!(
            store.document()["gs_config"]["cameras"]["kExpectedBallRadiusPixelsAt40cmCamera2"],
            json!(doubled.to_string())
        );
    }

    #[test]
    fn coverage_reports_missing_keys() {
        let store = JsonConfigStore::from_value("unused.json", sample_doc());
        let coverage = store.startup_coverage(CameraId::One);
        assert_eq!(coverage.len(), 5);
        let focal = coverage
            .iter()
            .find(|c| c.key == "kCamera1FocalLength")
            .unwrap();
        assert!(focal.present);
        assert_eq!(
            coverage.iter().filter(|c| !c.present).count(),
            4,
            "only the focal length is set"
        );
    }

    #[test]
    fn explicit_path_wins_and_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("custom.json");
        fs::write(&explicit, "{}").unwrap();
        let resolved = JsonConfigStore::resolve_path_with_root(Some(&explicit), None).unwrap();
        assert_eq!(resolved, fs::canonicalize(&explicit).unwrap());

        assert!(JsonConfigStore::resolve_path_with_root(None, Some(dir.path())).is_err());

        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src").join(CONFIG_FILE_NAME), "{}").unwrap();
        let from_root = JsonConfigStore::resolve_path_with_root(None, Some(dir.path())).unwrap();
        assert!(from_root.ends_with(Path::new("src").join(CONFIG_FILE_NAME)));
    }
}
