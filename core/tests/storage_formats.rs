//! Round trips through every on-disk format the crate owns

#[cfg(test)]
mod tests {
    use treegram_core::{
        Config, Discounting, Event, NgramCounter, PcfgModel, SequenceCounter, SequenceModel,
        SymbolTable, Tree,
    };
    use std::fs;
    use std::path::PathBuf;

    fn temp_path(stem: &str, ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "treegram_{}_{}.{}",
            stem,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos(),
            ext
        ))
    }

    #[test]
    fn config_toml_round_trip() {
        let mut config = Config::default();
        config.order = 3;
        config.digit2at = true;
        config.parent_alpha = 0.9;
        config.feature_prefix = "nt".to_string();

        let toml_path = temp_path("config", "toml");
        config.save_toml(&toml_path).expect("save TOML config");
        let loaded = Config::load_toml(&toml_path).expect("load TOML config");

        assert_eq!(loaded.order, 3);
        assert!(loaded.digit2at);
        assert_eq!(loaded.parent_alpha, 0.9);
        assert_eq!(loaded.feature_prefix, "nt");
        assert_eq!(loaded.unk_word, config.unk_word);

        let _ = fs::remove_file(toml_path);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = Config::from_toml_str("order = 2\nparent = false\n").expect("parse TOML");
        assert_eq!(config.order, 2);
        assert!(!config.parent);
        // everything unnamed falls back to the defaults
        let defaults = Config::default();
        assert_eq!(config.parent_alpha, defaults.parent_alpha);
        assert_eq!(config.unk_word, defaults.unk_word);
        assert_eq!(config.witten_bell, defaults.witten_bell);
    }

    #[test]
    fn sequence_model_bincode_round_trip() {
        let cfg = Config::default();
        let mut counter = SequenceCounter::new(&cfg);
        for line in [
            "(S (NP (DT the) (NN dog)) (VP (VBZ barks)))",
            "(S (NP (DT the) (NN cat)) (VP (VBZ sleeps)))",
        ] {
            counter
                .observe_tree(&Tree::parse(line).expect("parse tree"))
                .expect("observe tree");
        }
        let model = counter.train(&cfg);

        let path = temp_path("sequence", "bin");
        model.save_bincode(&path).expect("save bincode model");
        let loaded = SequenceModel::load_bincode(&path).expect("load bincode model");

        assert_eq!(loaded.order(), model.order());
        assert_eq!(loaded.parent_count(), model.parent_count());
        // scores must survive the trip bit for bit
        let production = Event::Production {
            parent: "S".into(),
            children: vec!["NP".into(), "VP".into()],
        };
        let emission = Event::Lexical {
            tag: "NN".into(),
            word: "\"dog\"".into(),
        };
        let unseen = Event::Lexical {
            tag: "NN".into(),
            word: "\"zebra\"".into(),
        };
        for ev in [&production, &emission, &unseen] {
            assert_eq!(loaded.evaluate(ev), model.evaluate(ev));
        }
        assert_eq!(
            loaded.lexical().logp_unk(),
            model.lexical().logp_unk()
        );

        let _ = fs::remove_file(path);
    }

    #[test]
    fn compiled_table_matches_text_form() {
        // the aggregation of two copies of one tree, rows presorted
        let rows = [
            "\"barks\"\t2\t6",
            "\"dog\"\t2\t6",
            "\"the\"\t2\t6",
            "(TOTAL_LEX)\t6\t6",
            "(TOTAL_NT)\t12\t12",
            "DT\t2\t12",
            "DT \"the\"\t2\t2",
            "NN\t2\t12",
            "NN \"dog\"\t2\t2",
            "NP\t2\t12",
            "NP DT NN\t2\t2",
            "S\t2\t12",
            "S NP VP\t2\t2",
            "VBZ\t2\t12",
            "VBZ \"barks\"\t2\t2",
            "VP\t2\t12",
            "VP VBZ\t2\t2",
        ];
        let table_path = temp_path("table", "tsv");
        fs::write(&table_path, rows.join("\n")).expect("write table");
        let model = PcfgModel::read(&table_path, "pcfg").expect("read table");
        assert_eq!(model.len(), 15);
        assert_eq!(model.total_nt(), Some(12.0));
        assert_eq!(model.total_lex(), Some(6.0));

        let fst_path = temp_path("table", "fst");
        let costs_path = temp_path("table", "costs");
        model
            .compile(&fst_path, &costs_path)
            .expect("compile table");
        let compiled = PcfgModel::load_compiled(&fst_path, &costs_path).expect("load compiled");

        assert_eq!(compiled.len(), model.len());
        assert_eq!(compiled.prefix(), model.prefix());
        assert_eq!(compiled.total_nt(), model.total_nt());
        assert_eq!(compiled.total_lex(), model.total_lex());
        for row in &rows {
            let key = row.split('\t').next().unwrap();
            assert_eq!(compiled.cost_of(key), model.cost_of(key), "key {key:?}");
        }
        assert!(compiled.parent_known("NP"));
        assert!(!compiled.parent_known("\"dog\""));

        // exact, backed off, and out-of-vocabulary events all agree
        let exact = Event::Production {
            parent: "S".into(),
            children: vec!["NP".into(), "VP".into()],
        };
        let backed_off = Event::Production {
            parent: "NP".into(),
            children: vec!["NN".into(), "NN".into()],
        };
        let oov = Event::Production {
            parent: "NP".into(),
            children: vec!["XX".into()],
        };
        for ev in [&exact, &backed_off, &oov] {
            assert_eq!(compiled.cost(ev), model.cost(ev));
        }

        for p in [table_path, fst_path, costs_path] {
            let _ = fs::remove_file(p);
        }
    }

    #[test]
    fn arpa_dump_lists_every_section() {
        let mut symbols = SymbolTable::new();
        let a = symbols.intern("a");
        let b = symbols.intern("b");
        let mut counter = NgramCounter::new(2);
        counter.add_ngram(Vec::new(), a, 2.0);
        counter.add_ngram(Vec::new(), b, 2.0);
        counter.add_ngram(vec![a], b, 1.0);
        let lm = counter.train_lm(Discounting::WittenBell);

        let mut out = Vec::new();
        lm.write_arpa(&mut out, &symbols).expect("write ARPA");
        let text = String::from_utf8(out).expect("utf8 ARPA");

        assert!(text.starts_with("\\data\\\nngram 1=2\nngram 2=1\n"));
        // the unigram "a" carries a backoff weight because it also
        // serves as a bigram context; "b" does not
        assert!(text.contains("\n\\1-grams:\n"));
        assert!(text.contains("-0.301030\ta\t"));
        assert!(text.contains("-0.301030\tb\n"));
        assert!(text.contains("\n\\2-grams:\n-0.301030\ta b\n"));
        assert!(text.ends_with("\n\\end\\\n"));
    }
}
