use pmat::Dump;

pub fn dump_roots(dump: &Dump) {
    println!("{} undef", dump.roots.undef);
    println!("{} yes", dump.roots.yes);
    println!("{} no", dump.roots.no);
    for (name, ptr) in &dump.roots.other {
        let name = name.as_utf8_lossy();
        match root_desc(&name) {
            Some(desc) => println!("{ptr} {name}: {desc}"),
            None => println!("{ptr} {name}"),
        }
    }
}

/// Prose for the well-known root slot names.
fn root_desc(name: &str) -> Option<&'static str> {
    Some(match name {
        "main_cv" => "the main code",
        "defstash" => "the default stash",
        "mainstack" => "the main stack AV",
        "beginav" => "the BEGIN list",
        "checkav" => "the CHECK list",
        "unitcheckav" => "the UNITCHECK list",
        "initav" => "the INIT list",
        "endav" => "the END list",
        "strtab" => "the shared string table HV",
        "envgv" => "the ENV GV",
        "incgv" => "the INC GV",
        "statgv" => "the stat GV",
        "statname" => "the statname SV",
        "tmpsv" => "the temporary SV",
        "defgv" => "the default GV",
        "argvgv" => "the ARGV GV",
        "argoutgv" => "the argvout GV",
        "argvout_stack" => "the argout stack AV",
        "fdpidav" => "the FD-to-PID mapping AV",
        "preambleav" => "the compiler preamble AV",
        "modglobalhv" => "the module data globals HV",
        "regex_padav" => "the REGEXP pad AV",
        "sortstash" => "the sort stash",
        "firstgv" => "the *a GV",
        "secondgv" => "the *b GV",
        "debstash" => "the debugger stash",
        "stashcache" => "the stash cache",
        "isarev" => "the reverse map of @ISA dependencies",
        "registered_mros" => "the registered MROs HV",
        "rs" => "the IRS",
        "last_in_gv" => "the last input GV",
        "ofsgv" => "the OFS GV",
        "defoutgv" => "the default output GV",
        "hintgv" => "the hints (%^H) GV",
        "patchlevel" => "the patch level",
        "apiversion" => "the API version",
        "e_script" => "the '-e' script",
        "mess_sv" => "the message SV",
        "ors_sv" => "the ORS SV",
        "encoding" => "the encoding",
        "blockhooks" => "the block hooks",
        "custom_ops" => "the custom ops HV",
        "custom_op_names" => "the custom op names HV",
        "custom_op_descs" => "the custom op descriptions HV",
        _ => return None,
    })
}
