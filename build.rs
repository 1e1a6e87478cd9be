// rust-embed bakes the templates into the binary at compile time, but Cargo
// does not track those files on its own. Rerun whenever they change.

fn main() {
    println!("cargo:rerun-if-changed=templates/");
}
