//! End-to-end links over synthetic inputs, verified by parsing the produced
//! bytes back with `object`.

use object::elf;
use object::Object;
use object::ObjectSection;
use object::ObjectSegment;
use object::ObjectSymbol;
use weld::args::LinkerConfig;
use weld::args::OutputKind;
use weld::attributes::AttributeFactory;
use weld::context::LDContext;
use weld::context::LDSection;
use weld::context::LDSymbol;
use weld::context::SectionKind;
use weld::error::ErrorKind;
use weld::error::LinkError;
use weld::input::Input;
use weld::input::InputId;
use weld::input::InputKind;
use weld::input::InputTree;
use weld::symbol::Binding;
use weld::symbol::SymbolDesc;
use weld::symbol::SymbolType;
use weld::symbol::Visibility;
use weld::x86_64::X86_64;

type ElfOut<'data> = object::read::elf::ElfFile64<'data, object::LittleEndian, &'data [u8]>;

const AX: u64 = (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64;
const AW: u64 = (elf::SHF_ALLOC | elf::SHF_WRITE) as u64;
const A: u64 = elf::SHF_ALLOC as u64;

fn text_object(funcs: &[(&str, Binding, u64)]) -> LDContext {
    let code = vec![0xc3u8; 0x20];
    let section = LDSection::new(".text", SectionKind::Regular, elf::SHT_PROGBITS, AX)
        .with_data(code, 16);
    let mut ctx = LDContext {
        sections: vec![section],
        symbols: Vec::new(),
    };
    for &(name, binding, value) in funcs {
        let mut sym = LDSymbol::defined(name, binding, 0);
        sym.value = value;
        sym.size = 8;
        ctx.symbols.push(sym);
    }
    ctx
}

fn add_object(tree: &mut InputTree, attrs: &mut AttributeFactory, name: &str, ctx: LDContext) -> InputId {
    let mut input = Input::new(name, name, attrs.snapshot());
    input.set_kind(InputKind::Object).unwrap();
    input.context = Some(ctx);
    tree.push(input)
}

fn add_dynobj(
    tree: &mut InputTree,
    attrs: &mut AttributeFactory,
    name: &str,
    exports: &[&str],
) -> InputId {
    let mut ctx = LDContext::default();
    for export in exports {
        let mut sym = LDSymbol::defined(*export, Binding::Global, 0);
        sym.value = 0x1000;
        sym.section = None;
        ctx.symbols.push(sym);
    }
    let mut input = Input::new(name, name, attrs.snapshot());
    input.set_kind(InputKind::DynObj).unwrap();
    input.context = Some(ctx);
    tree.push(input)
}

fn undef_ref(name: &str) -> LDSymbol {
    LDSymbol::undefined(name)
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn dynamic_entries(obj: &ElfOut) -> Vec<(u64, u64)> {
    let Some(section) = obj.section_by_name(".dynamic") else {
        return Vec::new();
    };
    section
        .data()
        .unwrap()
        .chunks_exact(16)
        .map(|chunk| {
            (
                u64::from_le_bytes(chunk[..8].try_into().unwrap()),
                u64::from_le_bytes(chunk[8..].try_into().unwrap()),
            )
        })
        .collect()
}

fn dynstr_at<'a>(obj: &'a ElfOut, offset: u64) -> &'a str {
    let data = obj.section_by_name(".dynstr").unwrap().data().unwrap();
    let rest = &data[offset as usize..];
    let end = rest.iter().position(|&b| b == 0).unwrap();
    std::str::from_utf8(&rest[..end]).unwrap()
}

#[test]
fn two_objects_static_executable() {
    init_logging();
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    add_object(&mut tree, &mut attrs, "a.o", text_object(&[("foo", Binding::Global, 0)]));
    add_object(&mut tree, &mut attrs, "b.o", text_object(&[("bar", Binding::Global, 0)]));
    let config = LinkerConfig {
        entry: Some("foo".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, outcome) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    assert!(outcome.warnings.is_empty());

    let obj = ElfOut::parse(&*bytes).unwrap();
    assert_eq!(obj.kind(), object::ObjectKind::Executable);

    // Two entries plus the reserved null at index 0; strings from offset 0.
    let symtab = obj.section_by_name(".symtab").unwrap();
    assert_eq!(symtab.size(), 3 * 24);
    let strtab = obj.section_by_name(".strtab").unwrap();
    assert_eq!(strtab.data().unwrap(), b"\0foo\0bar\0");
    assert!(obj.section_by_name(".dynsym").is_none());
    assert!(obj.section_by_name(".dynamic").is_none());

    // The entry point resolves to foo's placed address inside .text.
    let text = obj.section_by_name(".text").unwrap();
    assert_eq!(obj.entry(), text.address());
    let foo = obj.symbols().find(|s| s.name().is_ok_and(|n| n == "foo")).unwrap();
    assert_eq!(foo.address(), text.address());
    let bar = obj.symbols().find(|s| s.name().is_ok_and(|n| n == "bar")).unwrap();
    // b.o's .text lands after a.o's 0x20 bytes.
    assert_eq!(bar.address(), text.address() + 0x20);
}

#[test]
fn weak_definition_overridden_silently() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    add_object(&mut tree, &mut attrs, "a.o", text_object(&[("main", Binding::Weak, 0)]));
    add_object(&mut tree, &mut attrs, "b.o", text_object(&[("main", Binding::Global, 4)]));
    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, outcome) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    assert!(outcome.warnings.is_empty());

    let obj = ElfOut::parse(&*bytes).unwrap();
    let mains: Vec<_> = obj.symbols().filter(|s| s.name().is_ok_and(|n| n == "main")).collect();
    assert_eq!(mains.len(), 1);
    assert!(mains[0].is_global());
    assert!(!mains[0].is_weak());
    // Value comes from b.o: its .text chunk starts at 0x20, plus 4.
    let text = obj.section_by_name(".text").unwrap();
    assert_eq!(mains[0].address(), text.address() + 0x24);
}

#[test]
fn duplicate_strong_definitions_abort_without_output() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    add_object(&mut tree, &mut attrs, "a.o", text_object(&[("main", Binding::Global, 0)]));
    add_object(&mut tree, &mut attrs, "b.o", text_object(&[("main", Binding::Global, 0)]));

    let output = std::env::temp_dir().join("weld_dup_test_output");
    let config = LinkerConfig {
        output: output.clone(),
        entry: Some("main".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let err = weld::link(&config, &mut tree, &attrs, &mut backend).unwrap_err();
    let tagged = err.downcast_ref::<LinkError>().unwrap();
    assert_eq!(tagged.kind, ErrorKind::MultipleDefinition);
    assert!(tagged.message.contains("main"));
    assert!(!output.exists());
}

#[test]
fn unresolved_reference_fails_executables_only() {
    let build = || {
        let mut attrs = AttributeFactory::new();
        let mut tree = InputTree::new();
        let mut ctx = text_object(&[("main", Binding::Global, 0)]);
        ctx.symbols.push(undef_ref("missing"));
        add_object(&mut tree, &mut attrs, "main.o", ctx);
        (attrs, tree)
    };

    let (attrs, mut tree) = build();
    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let err = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap_err();
    assert_eq!(
        err.downcast_ref::<LinkError>().unwrap().kind,
        ErrorKind::UnresolvedSymbol
    );

    // The same inputs are fine in a shared object.
    let (attrs, mut tree) = build();
    let config = LinkerConfig {
        output_kind: OutputKind::DynObj,
        ..Default::default()
    };
    assert!(weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).is_ok());
}

#[test]
fn dt_needed_follows_as_needed() {
    init_logging();
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    let mut main_ctx = text_object(&[("main", Binding::Global, 0)]);
    main_ctx.symbols.push(undef_ref("sin"));
    add_object(&mut tree, &mut attrs, "main.o", main_ctx);
    attrs.current_mut().as_needed = true;
    add_dynobj(&mut tree, &mut attrs, "libm.so", &["sin", "cos"]);
    add_dynobj(&mut tree, &mut attrs, "libunused.so", &["tan"]);

    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, _) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    let obj = ElfOut::parse(&*bytes).unwrap();

    let needed: Vec<&str> = dynamic_entries(&obj)
        .iter()
        .filter(|(tag, _)| *tag == u64::from(elf::DT_NEEDED))
        .map(|&(_, value)| dynstr_at(&obj, value))
        .collect();
    assert_eq!(needed, vec!["libm.so"]);

    // sin is imported: present in .dynsym, undefined in the output.
    let sin = obj
        .dynamic_symbols()
        .find(|s| s.name().is_ok_and(|n| n == "sin"))
        .unwrap();
    assert!(sin.is_undefined());
    // cos was never referenced and stays out of the output tables entirely.
    assert!(obj.dynamic_symbols().all(|s| !s.name().is_ok_and(|n| n == "cos")));
    assert!(obj.symbols().all(|s| !s.name().is_ok_and(|n| n == "cos")));
}

#[test]
fn no_as_needed_keeps_unreferenced_libraries() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    add_object(&mut tree, &mut attrs, "main.o", text_object(&[("main", Binding::Global, 0)]));
    add_dynobj(&mut tree, &mut attrs, "libextra.so", &["helper"]);

    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, _) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    let obj = ElfOut::parse(&*bytes).unwrap();
    let needed: Vec<&str> = dynamic_entries(&obj)
        .iter()
        .filter(|(tag, _)| *tag == u64::from(elf::DT_NEEDED))
        .map(|&(_, value)| dynstr_at(&obj, value))
        .collect();
    assert_eq!(needed, vec!["libextra.so"]);
}

#[test]
fn shared_object_exports_and_hash_chains() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    let names = [
        "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta",
    ];
    let mut ctx = LDContext {
        sections: vec![
            LDSection::new(".text", SectionKind::Regular, elf::SHT_PROGBITS, AX)
                .with_data(vec![0xc3; 0x40], 16),
        ],
        symbols: Vec::new(),
    };
    for (index, name) in names.iter().enumerate() {
        let mut sym = LDSymbol::defined(*name, Binding::Global, 0);
        sym.value = index as u64;
        sym.size = 1;
        ctx.symbols.push(sym);
    }
    // A hidden symbol must not be exported.
    let mut hidden = LDSymbol::defined("secret", Binding::Global, 0);
    hidden.value = 0x10;
    hidden.visibility = Visibility::Hidden;
    ctx.symbols.push(hidden);
    add_object(&mut tree, &mut attrs, "lib.o", ctx);

    let config = LinkerConfig {
        output_kind: OutputKind::DynObj,
        output: "libtest.so".into(),
        soname: Some("libtest.so.1".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, _) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    let obj = ElfOut::parse(&*bytes).unwrap();
    assert_eq!(obj.kind(), object::ObjectKind::Dynamic);

    let exported: Vec<String> = obj
        .dynamic_symbols()
        .filter_map(|s| s.name().ok().map(str::to_owned))
        .collect();
    for name in names {
        assert!(exported.contains(&name.to_owned()), "{name} not exported");
    }
    assert!(!exported.contains(&"secret".to_owned()));

    let soname = dynamic_entries(&obj)
        .iter()
        .find(|(tag, _)| *tag == u64::from(elf::DT_SONAME))
        .map(|&(_, value)| dynstr_at(&obj, value).to_owned())
        .unwrap();
    assert_eq!(soname, "libtest.so.1");

    // Every dynamic symbol is reachable through its hash bucket's chain.
    let hash = obj.section_by_name(".hash").unwrap().data().unwrap();
    let word = |i: usize| u32::from_le_bytes(hash[i * 4..i * 4 + 4].try_into().unwrap());
    let nbucket = word(0) as usize;
    let nchain = word(1) as usize;
    assert_eq!(hash.len(), (2 + nbucket + nchain) * 4);
    // 8 exports + null entry.
    assert_eq!(nchain, names.len() + 1);

    let dynsym = obj.section_by_name(".dynsym").unwrap().data().unwrap();
    let dynstr = obj.section_by_name(".dynstr").unwrap().data().unwrap();
    for index in 1..nchain {
        let st_name =
            u32::from_le_bytes(dynsym[index * 24..index * 24 + 4].try_into().unwrap()) as usize;
        let name_end = st_name + dynstr[st_name..].iter().position(|&b| b == 0).unwrap();
        let name = &dynstr[st_name..name_end];
        let mut h: u32 = 0;
        for &byte in name {
            h = (h << 4).wrapping_add(u32::from(byte));
            let g = h & 0xf000_0000;
            if g != 0 {
                h ^= g >> 24;
            }
            h &= !g;
        }
        let mut cursor = word(2 + (h as usize % nbucket));
        let mut found = false;
        while cursor != 0 {
            if cursor as usize == index {
                found = true;
                break;
            }
            cursor = word(2 + nbucket + cursor as usize);
        }
        assert!(found, "dynsym index {index} unreachable through .hash");
    }
}

#[test]
fn load_segments_split_on_write_flag() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    let mut ctx = text_object(&[("main", Binding::Global, 0)]);
    ctx.sections.push(
        LDSection::new(".rodata", SectionKind::Regular, elf::SHT_PROGBITS, A)
            .with_data(vec![7; 0x10], 8),
    );
    ctx.sections.push(
        LDSection::new(".data", SectionKind::Regular, elf::SHT_PROGBITS, AW)
            .with_data(vec![9; 0x18], 8),
    );
    ctx.sections
        .push(LDSection::new(".bss", SectionKind::Bss, elf::SHT_NOBITS, AW).with_size(0x100, 32));
    add_object(&mut tree, &mut attrs, "main.o", ctx);

    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, _) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    let obj = ElfOut::parse(&*bytes).unwrap();

    let loads: Vec<_> = obj.segments().collect();
    assert_eq!(loads.len(), 2);
    let data = obj.section_by_name(".data").unwrap();
    let bss = obj.section_by_name(".bss").unwrap();
    let (_, file_size) = loads[1].file_range();
    assert_eq!(file_size, data.size());
    assert_eq!(
        loads[1].size(),
        bss.address() + bss.size() - loads[1].address()
    );
    // The first load spans the file and section headers too.
    assert_eq!(loads[0].file_range().0, 0);
}

#[test]
fn group_rescan_pulls_archive_members() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();

    // The archive comes first, so only the group re-scan can pull from it.
    let member_a = tree.register({
        let mut input = Input::new("libx.a(helper.o)", "helper.o", attrs.snapshot());
        input.set_kind(InputKind::Object).unwrap();
        input.context = Some(text_object(&[("helper", Binding::Global, 0)]));
        input
    });
    let member_b = tree.register({
        let mut input = Input::new("libx.a(unused.o)", "unused.o", attrs.snapshot());
        input.set_kind(InputKind::Object).unwrap();
        input.context = Some(text_object(&[("unused_fn", Binding::Global, 0)]));
        input
    });
    tree.begin_group();
    let mut archive = Input::new("libx.a", "libx.a", attrs.snapshot());
    archive.set_kind(InputKind::Archive).unwrap();
    archive.members = vec![member_a, member_b];
    tree.push(archive);

    let mut main_ctx = text_object(&[("main", Binding::Global, 0)]);
    main_ctx.symbols.push(undef_ref("helper"));
    add_object(&mut tree, &mut attrs, "main.o", main_ctx);
    tree.end_group().unwrap();

    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, _) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    let obj = ElfOut::parse(&*bytes).unwrap();
    let names: Vec<String> = obj
        .symbols()
        .filter_map(|s| s.name().ok().map(str::to_owned))
        .collect();
    assert!(names.contains(&"helper".to_owned()));
    // The unreferenced member was never pulled.
    assert!(!names.contains(&"unused_fn".to_owned()));
}

#[test]
fn whole_archive_pulls_everything() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    let member = tree.register({
        let mut input = Input::new("liby.a(only.o)", "only.o", attrs.snapshot());
        input.set_kind(InputKind::Object).unwrap();
        input.context = Some(text_object(&[("orphan", Binding::Global, 0)]));
        input
    });
    attrs.current_mut().whole_archive = true;
    let mut archive = Input::new("liby.a", "liby.a", attrs.snapshot());
    archive.set_kind(InputKind::Archive).unwrap();
    archive.members = vec![member];
    tree.push(archive);
    attrs.current_mut().whole_archive = false;
    add_object(&mut tree, &mut attrs, "main.o", text_object(&[("main", Binding::Global, 0)]));

    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, _) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    let obj = ElfOut::parse(&*bytes).unwrap();
    assert!(obj.symbols().any(|s| s.name().is_ok_and(|n| n == "orphan")));
}

#[test]
fn commons_are_allocated_into_bss() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    let mut ctx = text_object(&[("main", Binding::Global, 0)]);
    let mut common = LDSymbol::defined("shared_buf", Binding::Global, 16);
    common.desc = SymbolDesc::Common;
    common.sym_type = SymbolType::Object;
    common.value = 16; // requested alignment
    common.size = 64;
    common.section = None;
    ctx.symbols.push(common);
    add_object(&mut tree, &mut attrs, "main.o", ctx);

    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, _) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    let obj = ElfOut::parse(&*bytes).unwrap();
    let bss = obj.section_by_name(".bss").unwrap();
    assert!(bss.size() >= 64);
    let sym = obj
        .symbols()
        .find(|s| s.name().is_ok_and(|n| n == "shared_buf"))
        .unwrap();
    assert_eq!(sym.address() % 16, 0);
    assert!(sym.address() >= bss.address());
    assert_eq!(sym.size(), 64);
}

#[test]
fn defsym_defines_absolute_symbols() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    add_object(&mut tree, &mut attrs, "main.o", text_object(&[("main", Binding::Global, 0)]));
    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        defsyms: vec![
            weld::linker_script::parse_defsym("__base=0x400000").unwrap(),
            weld::linker_script::parse_defsym("__top=__base + 0x1000").unwrap(),
        ],
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, _) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    let obj = ElfOut::parse(&*bytes).unwrap();
    let top = obj.symbols().find(|s| s.name().is_ok_and(|n| n == "__top")).unwrap();
    assert_eq!(top.address(), 0x401000);
    assert_eq!(
        top.section_index(),
        None // SHN_ABS
    );
}

#[test]
fn interp_section_makes_a_pt_interp() {
    let mut attrs = AttributeFactory::new();
    let mut tree = InputTree::new();
    let mut main_ctx = text_object(&[("main", Binding::Global, 0)]);
    main_ctx.symbols.push(undef_ref("puts"));
    add_object(&mut tree, &mut attrs, "main.o", main_ctx);
    add_dynobj(&mut tree, &mut attrs, "libc.so.6", &["puts"]);

    let config = LinkerConfig {
        entry: Some("main".to_owned()),
        dynamic_linker: Some("/lib64/ld-linux-x86-64.so.2".into()),
        ..Default::default()
    };
    let mut backend = X86_64;
    let (bytes, _) = weld::link_in_memory(&config, &mut tree, &attrs, &mut backend).unwrap();
    let obj = ElfOut::parse(&*bytes).unwrap();
    let interp = obj.section_by_name(".interp").unwrap();
    assert_eq!(interp.data().unwrap(), b"/lib64/ld-linux-x86-64.so.2\0");
}
