use pmat::report::render_sizes;
use pmat::Dump;

pub fn dump_sizes(dump: &Dump) {
    print!("{}", render_sizes(&dump.objects));
}
