fn main() {
    if let Err(err) = video_downloader_lib::run() {
        eprintln!("video-downloader error: {:#}", err);
        std::process::exit(1);
    }
}
