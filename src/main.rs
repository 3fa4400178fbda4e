//! Entry point: parses arguments, opens the backing image, and mounts it
//! through FUSE.

use std::env;
use std::path::PathBuf;
use std::process::exit;

use fuser::MountOption;

use blockfs::fuse_adapter;
use blockfs::image;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
	/// The name of the current program, used in usage messages.
	prog: String,

	/// Path to the directory the filesystem will be mounted on.
	mount_point: Option<PathBuf>,
	/// Path to the backing image file.
	image_path: Option<PathBuf>,

	/// Run in the foreground instead of forking to the background.
	foreground: bool,
	/// Enable FUSE-level debug logging.
	debug: bool,
	/// Force single-threaded operation (the adapter already is).
	single_threaded: bool,
}

fn parse_args() -> Args {
	let mut args = Args::default();
	let mut iter = env::args();

	args.prog = iter.next().unwrap_or_else(|| "blockfs".to_owned());
	args.foreground = true;

	let mut positional = Vec::new();
	for arg in iter {
		match arg.as_str() {
			"-f" | "--foreground" => args.foreground = true,
			"-d" | "--debug" => args.debug = true,
			"-s" | "--single-threaded" => args.single_threaded = true,
			_ => positional.push(arg),
		}
	}

	if let Some(p) = positional.first() {
		args.image_path = Some(PathBuf::from(p));
	}
	if let Some(p) = positional.get(1) {
		args.mount_point = Some(PathBuf::from(p));
	}

	args
}

fn usage(prog: &str) -> ! {
	eprintln!("usage: {prog} [-f] [-d] [-s] <image-path> <mount-point>");
	exit(1);
}

fn main() {
	env_logger::init();

	let argc = env::args().count();
	if !(3..6).contains(&argc) {
		usage(&env::args().next().unwrap_or_else(|| "blockfs".to_owned()));
	}

	let args = parse_args();
	let image_path = args.image_path.unwrap_or_else(|| usage(&args.prog));
	let mount_point = args.mount_point.unwrap_or_else(|| usage(&args.prog));

	let image = image::Image::init(&image_path).unwrap_or_else(|e| {
		log::error!("failed to open image {}: {e}", image_path.display());
		exit(1);
	});

	let mut options = vec![MountOption::FSName("blockfs".to_string())];
	if args.debug {
		options.push(MountOption::AutoUnmount);
	}

	log::info!(
		"mounting {} on {} (foreground={}, single_threaded={})",
		image_path.display(),
		mount_point.display(),
		args.foreground,
		args.single_threaded,
	);

	let adapter = fuse_adapter::FuseAdapter::new(image);
	if let Err(e) = fuser::mount2(adapter, &mount_point, &options) {
		log::error!("mount failed: {e}");
		exit(1);
	}
}
