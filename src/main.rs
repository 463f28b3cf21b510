fn main() {
    std::process::exit(scs_cli::run());
}
