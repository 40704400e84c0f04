//! # Arm SDK client
//!
//! [`ArmChannel`] implementation driving the arm through the vendor SDK's command line tools. A
//! command is a JSON document written to the publisher tool's stdin, which forwards it to the arm
//! controller without any acknowledgement. Poses are read by starting the angle reader tool and
//! parsing the first complete line of `servoN_data:<angle>` fields it prints.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{
    io::{BufRead, BufReader, Write},
    path::PathBuf,
    process::{Command, Stdio},
    sync::{mpsc, Mutex},
    time::{Duration, Instant},
};

use comms_if::eqpt::{
    arm::{ArmChannel, ArmDems, JointPose, FORCE_MAX, FORCE_RELEASED},
    ChannelError,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Environment variable overriding the SDK build directory.
pub const SDK_BUILD_ENV: &str = "D1_SDK_BUILD";

/// Function code setting the holding force.
const FUNCODE_FORCE: u32 = 5;

/// Function code of a multi-joint move.
const FUNCODE_MULTI_JOINT: u32 = 2;

const SERVO_DATA_PATTERN: &str = r"servo\d+_data:([-+]?\d+(?:\.\d+)?)";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Location and environment of the SDK tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkParams {
    /// SDK build directory, relative paths are taken from the software root. `$D1_SDK_BUILD`
    /// takes precedence when set.
    pub build_dir: PathBuf,

    /// Name of the command publisher tool.
    pub publisher: String,

    /// Name of the joint angle reader tool.
    pub angle_reader: String,

    /// Directories prepended to `LD_LIBRARY_PATH` for the tools.
    pub lib_dirs: Vec<PathBuf>,

    /// DDS configuration URI, used unless `CYCLONEDDS_URI` is already set.
    pub dds_config_uri: Option<String>,
}

/// Arm channel over the SDK tools.
pub struct SdkArmChannel {
    dof: usize,
    publisher: PathBuf,
    angle_reader: PathBuf,
    env: Vec<(String, String)>,
    servo_data: Regex,

    /// Serialises wire writes, callers on different threads still race for the order.
    send_lock: Mutex<()>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("SDK tool {0:?} not found, build the SDK or set {}", SDK_BUILD_ENV)]
    ToolNotFound(PathBuf),

    #[error("Cannot find the software root directory: {0}")]
    SwRootNotFound(std::io::Error),

    #[error("Invalid servo data pattern: {0}")]
    Pattern(#[from] regex::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SdkParams {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("d1_sdk/build"),
            publisher: "arm_pub".into(),
            angle_reader: "get_arm_joint_angle".into(),
            lib_dirs: vec![PathBuf::from("/usr/local/lib")],
            dds_config_uri: None,
        }
    }
}

impl SdkArmChannel {
    /// Find the SDK tools and prepare their environment.
    pub fn new(params: &SdkParams, dof: usize) -> Result<Self, SdkError> {
        let build_dir = match std::env::var_os(SDK_BUILD_ENV) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ if params.build_dir.is_absolute() => params.build_dir.clone(),
            _ => util::host::get_sw_root()
                .map_err(SdkError::SwRootNotFound)?
                .join(&params.build_dir),
        };

        let publisher = build_dir.join(&params.publisher);
        let angle_reader = build_dir.join(&params.angle_reader);
        for tool in &[&publisher, &angle_reader] {
            if !tool.exists() {
                return Err(SdkError::ToolNotFound(tool.to_path_buf()));
            }
        }

        let mut lib_path: Vec<String> = params
            .lib_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect();
        if let Ok(existing) = std::env::var("LD_LIBRARY_PATH") {
            lib_path.push(existing);
        }

        let mut env = vec![("LD_LIBRARY_PATH".to_string(), lib_path.join(":"))];
        if let (Some(uri), Err(_)) = (&params.dds_config_uri, std::env::var("CYCLONEDDS_URI")) {
            env.push(("CYCLONEDDS_URI".to_string(), uri.clone()));
        }

        debug!("Using arm SDK tools in {:?}", build_dir);

        Ok(Self {
            dof,
            publisher,
            angle_reader,
            env,
            servo_data: Regex::new(SERVO_DATA_PATTERN)?,
            send_lock: Mutex::new(()),
        })
    }

    /// Write one JSON command to the publisher tool.
    fn publish(&self, payload: &Value) -> Result<(), ChannelError> {
        let doc = serde_json::to_string(payload).map_err(ChannelError::SerializationError)?;
        trace!("Publishing {}", doc);

        let _guard = match self.send_lock.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };

        let mut child = Command::new(&self.publisher)
            .arg("--stdin")
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()?;

        match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(doc.as_bytes())?,
            None => {
                child.kill()?;
                return Err(ChannelError::Transport("publisher stdin unavailable".into()));
            }
        }

        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(ChannelError::Transport(format!(
                "publisher exited with {}",
                status
            )))
        }
    }
}

impl ArmChannel for SdkArmChannel {
    fn dof(&self) -> usize {
        self.dof
    }

    fn set_force(&self, level: u32) -> Result<(), ChannelError> {
        if level > FORCE_MAX {
            return Err(ChannelError::Rejected(format!(
                "force level {} above the maximum of {}",
                level, FORCE_MAX
            )));
        }

        self.publish(&force_payload(level))
    }

    fn release_force(&self) -> Result<(), ChannelError> {
        self.publish(&force_payload(FORCE_RELEASED))
    }

    fn send_pose(&self, dems: &ArmDems) -> Result<(), ChannelError> {
        if dems.pose.dof() != self.dof {
            return Err(ChannelError::Rejected(format!(
                "expected {} joint angles, got {}",
                self.dof,
                dems.pose.dof()
            )));
        }

        self.publish(&multi_joint_payload(dems))
    }

    fn read_pose(&self, timeout: Duration) -> Option<JointPose> {
        let mut child = match Command::new(&self.angle_reader)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                warn!("Could not start the angle reader: {}", e);
                return None;
            }
        };

        let (tx, rx) = mpsc::channel();
        let reader = child.stdout.take().map(|stdout| {
            std::thread::spawn(move || forward_lines(BufReader::new(stdout), &tx))
        });

        let deadline = Instant::now() + timeout;
        let mut pose = None;
        while pose.is_none() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            match rx.recv_timeout(deadline - now) {
                Ok(line) => pose = parse_servo_data(&self.servo_data, &line, self.dof),
                Err(_) => break,
            }
        }

        // The reader streams until stopped
        if let Err(e) = child.kill() {
            debug!("Angle reader already stopped: {}", e);
        }
        if let Err(e) = child.wait() {
            warn!("Could not reap the angle reader: {}", e);
        }
        drop(rx);
        if let Some(r) = reader {
            if r.join().is_err() {
                warn!("Angle reader output thread panicked");
            }
        }

        pose
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn force_payload(level: u32) -> Value {
    json!({
        "seq": 4,
        "address": 1,
        "funcode": FUNCODE_FORCE,
        "data": { "mode": level },
    })
}

fn multi_joint_payload(dems: &ArmDems) -> Value {
    let dof = dems.pose.dof();
    let mut data = Map::new();

    for (i, angle) in dems.pose.as_slice().iter().enumerate() {
        data.insert(format!("angle{}", i), json!(angle));
    }
    data.insert("mode".into(), json!(dems.aux.mode));
    data.insert("habr".into(), json!(vec![dems.aux.habr; dof]));
    data.insert("plyLevel".into(), json!(vec![dems.aux.ply; dof]));

    json!({
        "seq": 4,
        "address": 1,
        "funcode": FUNCODE_MULTI_JOINT,
        "data": data,
    })
}

/// Send each line of `reader` down `tx`, stopping at the first read error or once the receiver is
/// gone. Returns the number of lines sent.
fn forward_lines<R: BufRead>(reader: R, tx: &mpsc::Sender<String>) -> usize {
    let mut sent = 0;

    for line in reader.lines() {
        match line {
            Ok(l) => {
                if tx.send(l).is_err() {
                    break;
                }
                sent += 1;
            }
            Err(_) => break,
        }
    }

    sent
}

/// Parse one line of angle reader output, `None` unless it holds exactly `dof` angles.
fn parse_servo_data(re: &Regex, line: &str, dof: usize) -> Option<JointPose> {
    let angles = re
        .captures_iter(line)
        .map(|c| c[1].parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    if angles.len() == dof {
        Some(JointPose::new(angles))
    } else {
        None
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::arm::AuxParams;

    #[test]
    fn test_payloads() {
        assert_eq!(
            force_payload(60_000),
            json!({"seq": 4, "address": 1, "funcode": 5, "data": {"mode": 60000}})
        );

        let dems = ArmDems {
            pose: JointPose::new(vec![1.5, -2.0, 3.0]),
            aux: AuxParams {
                mode: 1,
                habr: 20,
                ply: 3,
            },
        };
        let p = multi_joint_payload(&dems);

        assert_eq!(p["funcode"], json!(2));
        assert_eq!(p["data"]["angle0"], json!(1.5));
        assert_eq!(p["data"]["angle2"], json!(3.0));
        assert_eq!(p["data"]["mode"], json!(1));
        assert_eq!(p["data"]["habr"], json!([20, 20, 20]));
        assert_eq!(p["data"]["plyLevel"], json!([3, 3, 3]));
    }

    #[test]
    fn test_parse_servo_data() {
        let re = Regex::new(SERVO_DATA_PATTERN).unwrap();
        let line = "servo0_data:-9.8 servo1_data:-87.8 servo2_data:92.3 servo3_data:-7.7 \
                    servo4_data:0.5 servo5_data:10 servo6_data:+18.0";

        assert_eq!(
            parse_servo_data(&re, line, 7),
            Some(JointPose::new(vec![-9.8, -87.8, 92.3, -7.7, 0.5, 10.0, 18.0]))
        );
        assert_eq!(parse_servo_data(&re, line, 6), None);
        assert_eq!(parse_servo_data(&re, "waiting for data", 7), None);
    }

    #[test]
    fn test_forward_lines() {
        let out = "servo0_data:1.0\nservo0_data:2.0\n";

        let (tx, rx) = mpsc::channel();
        assert_eq!(forward_lines(out.as_bytes(), &tx), 2);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec!["servo0_data:1.0", "servo0_data:2.0"]
        );

        // A reader that gave up stops the forwarding
        let (tx, rx) = mpsc::channel();
        drop(rx);
        assert_eq!(forward_lines(out.as_bytes(), &tx), 0);
    }

    #[test]
    fn test_missing_tools() {
        let params = SdkParams {
            build_dir: PathBuf::from("/nonexistent/d1_sdk/build"),
            ..Default::default()
        };

        if std::env::var_os(SDK_BUILD_ENV).is_none() {
            assert!(matches!(
                SdkArmChannel::new(&params, 7),
                Err(SdkError::ToolNotFound(_))
            ));
        }
    }
}
