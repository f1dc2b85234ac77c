//! Media inspection via ffprobe.

use std::path::{Path, PathBuf};
use std::process::Command;

use cutline_common::error::{CutlineError, CutlineResult};
use serde::Deserialize;
use tracing::debug;

use crate::frame::PixelFormat;
use crate::sheet::DEFAULT_CANVAS;

/// A video stream as reported by ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Index among all streams of the container.
    pub stream_index: usize,
    pub codec: Option<String>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: Option<f64>,
    pub time_base: Option<String>,
    /// Presentation time of the first frame, in seconds.
    pub start_time: f64,
    pub duration_secs: Option<f64>,
    pub bit_rate: Option<u64>,
    pub frame_count: Option<u64>,
}

impl StreamInfo {
    /// A bare stream description, for sources that are not probed.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            stream_index: 0,
            codec: None,
            width,
            height,
            pixel_format,
            frame_rate: None,
            time_base: None,
            start_time: 0.0,
            duration_secs: None,
            bit_rate: None,
            frame_count: None,
        }
    }

    /// Display aspect ratio reduced to lowest terms, e.g. `(16, 9)`.
    pub fn aspect_ratio(&self) -> (u32, u32) {
        let divisor = gcd(self.width, self.height).max(1);
        (self.width / divisor, self.height / divisor)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Summary of a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub format_name: Option<String>,
    pub duration_secs: Option<f64>,
    pub bit_rate: Option<u64>,
    pub video: Vec<StreamInfo>,
    pub audio_streams: usize,
    pub subtitle_streams: usize,
}

/// Presentation time and keyframe flag of one video packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketTiming {
    pub time: f64,
    pub key_frame: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    packets: Vec<ProbePacket>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    time_base: Option<String>,
    start_time: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    nb_frames: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbePacket {
    pts_time: Option<String>,
    flags: Option<String>,
}

/// Parse an ffprobe rational such as `30000/1001`. Zero or malformed rates
/// yield `None`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => raw.trim().parse::<f64>().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_number<T: std::str::FromStr>(raw: &Option<String>) -> Option<T> {
    raw.as_deref().and_then(|s| s.trim().parse::<T>().ok())
}

fn run_ffprobe(ffprobe: &str, args: &[&str], path: &Path) -> CutlineResult<String> {
    let output = Command::new(ffprobe)
        .args(args)
        .arg(path)
        .output()
        .map_err(|e| CutlineError::decode(format!("Failed to start {ffprobe}: {e}")))?;

    if !output.status.success() {
        return Err(CutlineError::decode(format!(
            "ffprobe failed on {} (status {}): {}",
            path.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    String::from_utf8(output.stdout)
        .map_err(|e| CutlineError::decode(format!("ffprobe returned invalid UTF-8: {e}")))
}

/// Parse ffprobe's JSON stream/format report.
pub fn parse_media_info(path: &Path, json: &str) -> CutlineResult<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    let mut info = MediaInfo {
        path: path.to_path_buf(),
        format_name: probe.format.as_ref().and_then(|f| f.format_name.clone()),
        duration_secs: probe.format.as_ref().and_then(|f| parse_number(&f.duration)),
        bit_rate: probe.format.as_ref().and_then(|f| parse_number(&f.bit_rate)),
        video: vec![],
        audio_streams: 0,
        subtitle_streams: 0,
    };

    for stream in probe.streams {
        match stream.codec_type.as_deref() {
            Some("video") => {
                let frame_rate = stream
                    .avg_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));
                let pixel_format = stream
                    .pix_fmt
                    .as_deref()
                    .unwrap_or("unknown")
                    .parse()
                    .unwrap_or(PixelFormat::Other(String::new()));
                info.video.push(StreamInfo {
                    stream_index: stream.index,
                    codec: stream.codec_name,
                    width: stream.width.unwrap_or(0),
                    height: stream.height.unwrap_or(0),
                    pixel_format,
                    frame_rate,
                    time_base: stream.time_base,
                    start_time: parse_number(&stream.start_time).unwrap_or(0.0),
                    duration_secs: parse_number(&stream.duration),
                    bit_rate: parse_number(&stream.bit_rate),
                    frame_count: parse_number(&stream.nb_frames),
                });
            }
            Some("audio") => info.audio_streams += 1,
            Some("subtitle") => info.subtitle_streams += 1,
            _ => {}
        }
    }

    Ok(info)
}

/// Inspect every stream of a media file.
pub fn probe_media(ffprobe: &str, path: &Path) -> CutlineResult<MediaInfo> {
    let json = run_ffprobe(
        ffprobe,
        &[
            "-v",
            "error",
            "-show_entries",
            "stream=index,codec_type,codec_name,width,height,pix_fmt,avg_frame_rate,\
             r_frame_rate,time_base,start_time,duration,bit_rate,nb_frames:\
             format=format_name,duration,bit_rate",
            "-of",
            "json",
        ],
        path,
    )?;
    parse_media_info(path, &json)
}

/// The `track`-th video stream of a file.
pub fn probe_video_stream(ffprobe: &str, path: &Path, track: usize) -> CutlineResult<StreamInfo> {
    let media = probe_media(ffprobe, path)?;
    let count = media.video.len();
    media.video.into_iter().nth(track).ok_or_else(|| {
        CutlineError::decode(format!(
            "{} has no video track {track} ({count} video stream(s))",
            path.display()
        ))
    })
}

/// Canvas size for overlay layout: the first video stream's dimensions, or
/// 1280x720 when the file has none or cannot be probed.
pub fn probe_canvas(ffprobe: &str, path: &Path) -> (u32, u32) {
    match probe_media(ffprobe, path) {
        Ok(media) => media
            .video
            .iter()
            .find(|s| s.width > 0 && s.height > 0)
            .map(|s| (s.width, s.height))
            .unwrap_or(DEFAULT_CANVAS),
        Err(e) => {
            debug!(error = %e, path = %path.display(), "Falling back to default canvas");
            DEFAULT_CANVAS
        }
    }
}

/// Parse ffprobe's JSON packet report, sorted by presentation time.
///
/// Discarded (`D`) packets never produce a frame and are skipped. A packet
/// without a timestamp still produces one, so it is kept and placed one
/// typical frame step after the packet decoded before it.
pub fn parse_packets(json: &str) -> CutlineResult<Vec<PacketTiming>> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    let decoded: Vec<(Option<f64>, bool)> = probe
        .packets
        .iter()
        .filter(|p| !p.flags.as_deref().is_some_and(|f| f.contains('D')))
        .map(|p| {
            (
                parse_number::<f64>(&p.pts_time).filter(|t| t.is_finite()),
                p.flags.as_deref().is_some_and(|f| f.starts_with('K')),
            )
        })
        .collect();

    let step = typical_step(decoded.iter().filter_map(|(time, _)| *time));
    let missing = decoded.iter().filter(|(time, _)| time.is_none()).count();
    if missing > 0 {
        debug!(missing, step, "Placing packets without timestamps");
    }

    let mut previous: Option<f64> = None;
    let mut packets: Vec<PacketTiming> = decoded
        .into_iter()
        .map(|(time, key_frame)| {
            let time = time.unwrap_or_else(|| previous.map_or(0.0, |t| t + step));
            previous = Some(time);
            PacketTiming { time, key_frame }
        })
        .collect();
    packets.sort_by(|a, b| a.time.total_cmp(&b.time));
    Ok(packets)
}

/// Median gap between consecutive timestamps, or zero with fewer than two.
fn typical_step(times: impl Iterator<Item = f64>) -> f64 {
    let mut times: Vec<f64> = times.collect();
    times.sort_by(f64::total_cmp);
    let mut gaps: Vec<f64> = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| *gap > 0.0)
        .collect();
    if gaps.is_empty() {
        return 0.0;
    }
    gaps.sort_by(f64::total_cmp);
    gaps[gaps.len() / 2]
}

/// Packet timings of the `track`-th video stream.
pub fn probe_packets(ffprobe: &str, path: &Path, track: usize) -> CutlineResult<Vec<PacketTiming>> {
    let selector = format!("v:{track}");
    let json = run_ffprobe(
        ffprobe,
        &[
            "-v",
            "error",
            "-select_streams",
            selector.as_str(),
            "-show_entries",
            "packet=pts_time,flags",
            "-of",
            "json",
        ],
        path,
    )?;
    parse_packets(&json)
}

/// First line of `<binary> -version`, or `None` if it cannot be run.
pub fn tool_version(binary: &str) -> Option<String> {
    let output = Command::new(binary).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.001);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_parse_media_info() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920,
                 "height": 1080, "pix_fmt": "yuv420p", "avg_frame_rate": "30000/1001",
                 "r_frame_rate": "30000/1001", "time_base": "1/30000", "start_time": "0.000000",
                 "duration": "10.010000", "bit_rate": "4000000", "nb_frames": "300"},
                {"index": 1, "codec_type": "audio", "codec_name": "aac"},
                {"index": 2, "codec_type": "video", "codec_name": "prores", "width": 640,
                 "height": 480, "pix_fmt": "yuv422p10le", "avg_frame_rate": "0/0",
                 "r_frame_rate": "24/1"}
            ],
            "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "10.010000",
                       "bit_rate": "4100000"}
        }"#;
        let info = parse_media_info(Path::new("talk.mp4"), json).unwrap();

        assert_eq!(info.audio_streams, 1);
        assert_eq!(info.video.len(), 2);
        assert_eq!(info.bit_rate, Some(4_100_000));

        let main = &info.video[0];
        assert_eq!((main.width, main.height), (1920, 1080));
        assert_eq!(main.pixel_format, PixelFormat::Yuv420p);
        assert_eq!(main.frame_count, Some(300));
        assert_eq!(main.aspect_ratio(), (16, 9));

        let second = &info.video[1];
        assert_eq!(second.stream_index, 2);
        assert_eq!(second.frame_rate, Some(24.0));
        assert!(!second.pixel_format.is_allowed());
        assert_eq!(second.aspect_ratio(), (4, 3));
    }

    #[test]
    fn test_parse_packets_sorts_and_flags_keyframes() {
        let json = r#"{"packets": [
            {"pts_time": "0.000000", "flags": "K__"},
            {"pts_time": "0.080000", "flags": "___"},
            {"pts_time": "0.040000", "flags": "___"},
            {"pts_time": "0.120000", "flags": "K_"}
        ]}"#;
        let packets = parse_packets(json).unwrap();
        let times: Vec<f64> = packets.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 0.04, 0.08, 0.12]);
        let keys: Vec<bool> = packets.iter().map(|p| p.key_frame).collect();
        assert_eq!(keys, vec![true, false, false, true]);
    }

    #[test]
    fn test_parse_packets_skips_discarded() {
        let json = r#"{"packets": [
            {"pts_time": "0.000", "flags": "K__"},
            {"pts_time": "0.500", "flags": "__D"},
            {"pts_time": "1.000", "flags": "___"},
            {"pts_time": "2.000", "flags": "K_D"},
            {"pts_time": "3.000", "flags": "K__"}
        ]}"#;
        let packets = parse_packets(json).unwrap();
        let times: Vec<f64> = packets.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 3.0]);
        assert_eq!(packets.iter().filter(|p| p.key_frame).count(), 2);
    }

    #[test]
    fn test_parse_packets_keeps_untimed_packets() {
        let json = r#"{"packets": [
            {"pts_time": "0.0", "flags": "K__"},
            {"pts_time": "1.0", "flags": "___"},
            {"pts_time": "N/A", "flags": "___"},
            {"flags": "___"},
            {"pts_time": "4.0", "flags": "K__"},
            {"pts_time": "5.0", "flags": "___"}
        ]}"#;
        let packets = parse_packets(json).unwrap();
        assert_eq!(packets.len(), 6);
        let times: Vec<f64> = packets.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(packets[4].key_frame);
    }

    #[test]
    fn test_parse_packets_untimed_first_packet_starts_at_zero() {
        let json = r#"{"packets": [
            {"pts_time": "N/A", "flags": "K__"},
            {"pts_time": "0.5", "flags": "___"}
        ]}"#;
        let packets = parse_packets(json).unwrap();
        let times: Vec<f64> = packets.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 0.5]);
        assert!(packets[0].key_frame);
    }

    #[test]
    fn test_probe_canvas_defaults_when_probe_fails() {
        let canvas = probe_canvas("/nonexistent/ffprobe", Path::new("missing.mp4"));
        assert_eq!(canvas, (1280, 720));
    }
}
