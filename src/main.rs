fn main() {
    if let Err(err) = cinema_loader::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
