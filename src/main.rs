fn main() {
    if let Err(err) = gsa_harmonize::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
