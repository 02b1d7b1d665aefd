fn main() -> std::process::ExitCode {
    ladder_cli::run()
}
