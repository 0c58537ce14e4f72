use pmat::Dump;

pub fn dump_header(dump: &Dump) {
    let flags = dump.header.flags;
    println!(
        "PMAT format {} generated on perl {}",
        dump.header.pmat_version_string(),
        dump.header.perl_version_string()
    );
    println!("Big-endian:  {}", yes_no(flags.is_big_endian()));
    println!("Int64:       {}", yes_no(flags.has_64bit_integers()));
    println!("Ptr64:       {}", yes_no(flags.has_64bit_pointers()));
    println!("Long double: {}", yes_no(flags.has_64bit_floats()));
    println!("Threads:     {}", yes_no(flags.has_threads()));
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
