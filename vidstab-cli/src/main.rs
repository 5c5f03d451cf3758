//! Stabilize a video and write out the result.

use clap::*;
use klt_estimator::KltEstimator;
use vidstab::prelude::v1::{Error, Result, *};

fn command() -> Command<'static> {
    Command::new("vidstab")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Two-pass 2D video stabilization")
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .help("Input .vraw file or directory of images")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .help("Output .vraw file or directory")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::new("codec")
                .long("codec")
                .help("Output encoding: vraw, or an image extension such as png")
                .takes_value(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::new("detector")
                .long("detector")
                .help("Keypoint detector: gftt, harris, fast or dense")
                .takes_value(true),
        )
        .arg(
            Arg::new("smoothing-window")
                .long("smoothing-window")
                .help("Number of frames to average the trajectory over")
                .takes_value(true),
        )
        .arg(
            Arg::new("smoothing-edge")
                .long("smoothing-edge")
                .help("Smoothing at the ends of the video: backfill or shrink")
                .takes_value(true),
        )
        .arg(
            Arg::new("border-type")
                .long("border-type")
                .help("Border fill: black, reflect, replicate or trail")
                .takes_value(true),
        )
        .arg(
            Arg::new("border-size")
                .long("border-size")
                .help("Border size in pixels, negative values crop the output")
                .takes_value(true)
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::new("trajectory-csv")
                .long("trajectory-csv")
                .help("Write raw and smoothed trajectories to a CSV file")
                .takes_value(true),
        )
}

/// Parse an optional argument.
fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T::Err: Into<Error>,
{
    matches
        .value_of(name)
        .map(|v| {
            v.parse::<T>()
                .map_err(Into::<Error>::into)
                .with_context(|| format!("invalid --{name} \"{v}\""))
        })
        .transpose()
}

fn load_config(matches: &ArgMatches) -> Result<StabilizerConfig> {
    let mut config = match matches.value_of("config") {
        Some(path) => {
            let file = std::fs::File::open(path).with_context(|| format!("opening {path}"))?;
            serde_json::from_reader(std::io::BufReader::new(file))
                .with_context(|| format!("parsing {path}"))?
        }
        None => StabilizerConfig::default(),
    };

    if let Some(detector) = parse_arg(matches, "detector")? {
        config.detector = detector;
    }

    if let Some(window) = parse_arg(matches, "smoothing-window")? {
        config.smoothing_window = window;
    }

    if let Some(edge) = parse_arg(matches, "smoothing-edge")? {
        config.smoothing_edge = edge;
    }

    if let Some(border_type) = parse_arg(matches, "border-type")? {
        config.border_type = border_type;
    }

    if let Some(border_size) = parse_arg(matches, "border-size")? {
        config.border_size = border_size;
    }

    Ok(config)
}

fn write_csv(path: &str, diagnostics: &Diagnostics) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {path}"))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in diagnostics.rows() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = command().get_matches();

    let input = matches.value_of("input").unwrap_or_default();
    let output = matches.value_of("output").unwrap_or_default();

    let config = load_config(&matches)?;

    let mut stabilizer = Stabilizer::new(config, KltEstimator::default())?;

    let mut source = frame_loader::create_source(input)?;

    // Validate before the output gets created.
    stabilizer.config().validate(source.dimensions())?;

    let mut sink =
        frame_loader::create_sink(output, matches.value_of("codec"), source.frame_rate())?;

    let report = stabilizer.run(&mut source, &mut sink)?;

    if let (Some(path), Some(diagnostics)) =
        (matches.value_of("trajectory-csv"), stabilizer.diagnostics())
    {
        write_csv(path, diagnostics)?;
        log::info!("Wrote trajectory to {path}");
    }

    println!("{report}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_of(args: &[&str]) -> Result<StabilizerConfig> {
        let matches = command().try_get_matches_from(
            ["vidstab", "-i", "in.vraw", "-o", "out.vraw"]
                .iter()
                .chain(args),
        )?;
        load_config(&matches)
    }

    #[test]
    fn flags_override_defaults() {
        let config = config_of(&[
            "--detector",
            "harris",
            "--border-type",
            "replicate",
            "--border-size",
            "-10",
            "--smoothing-window",
            "9",
        ])
        .unwrap();

        assert_eq!(config.detector, DetectorKind::Harris);
        assert_eq!(config.border_type, BorderKind::Replicate);
        assert_eq!(config.border_size, -10);
        assert_eq!(config.smoothing_window, 9);
        assert_eq!(config.min_matches, 3);
    }

    #[test]
    fn bad_flags() {
        assert!(config_of(&["--border-type", "wrap"]).is_err());
        assert!(config_of(&["--detector", "sift"]).is_err());
        assert!(config_of(&["--smoothing-window", "ten"]).is_err());
    }

    #[test]
    fn csv_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trajectory.csv");
        let path = path.to_str().unwrap();

        let mut stab = Stabilizer::new(
            StabilizerConfig {
                detector: DetectorKind::Dense,
                smoothing_window: 3,
                ..Default::default()
            },
            KltEstimator::default(),
        )
        .unwrap();

        let frames = vec![Frame::new(16, 16, PixelFormat::Gray8); 3];
        stab.run(&mut MemorySource::new(frames), &mut MemorySink::new())
            .unwrap();

        write_csv(path, stab.diagnostics().unwrap()).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("frame,raw_x,raw_y,raw_a,smooth_x,smooth_y,smooth_a,dx,dy,da")
        );
        assert_eq!(lines.count(), 2);
    }
}
