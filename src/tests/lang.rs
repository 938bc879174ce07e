//! End-to-end language behavior, driven through the scripted host.

use super::{run_ok, run_with, TestHost};
use crate::{Config, Interpreter, Program};

#[test]
fn for_loop_prints_its_range() {
    assert_eq!(run_ok("10 FOR I%=1 TO 3:PRINT I%;\" \";:NEXT"), "1 2 3 ");
}

#[test]
fn repeat_until_counts_to_five() {
    assert_eq!(run_ok("10 A%=0:REPEAT A%+=1:UNTIL A%=5:PRINT A%"), "5\n");
}

#[test]
fn case_selects_the_matching_arm() {
    assert_eq!(
        run_ok("10 CASE 2 OF WHEN 1:PRINT \"a\" WHEN 2,3:PRINT \"b\" OTHERWISE:PRINT \"c\" ENDCASE"),
        "b\n"
    );
}

#[test]
fn return_parameter_writes_back_to_the_caller() {
    let source = "\
10 DEF FNf(RETURN x%) x%=x%*2:=0
20 y%=10:d%=FNf(y%):PRINT y%";
    assert_eq!(run_ok(source), "20\n");
}

#[test]
fn return_parameter_of_a_fresh_variable_reads_zero() {
    let source = "\
10 PROCprobe(brand_new%)
20 END
30 DEF PROCprobe(RETURN x%)
40 PRINT x%
50 x%=7
60 ENDPROC";
    assert_eq!(run_ok(source), "0\n");
}

#[test]
fn missing_proc_is_caught_by_on_error() {
    let source = "\
10 ON ERROR PRINT \"caught\":END
20 PROC_nothere";
    assert_eq!(run_ok(source), "caught\n");
}

#[test]
fn swap_exchanges_array_elements() {
    let source =
        "10 DIM a%(2):a%(0)=10:a%(1)=20:a%(2)=30:SWAP a%(0),a%(2):PRINT a%(0);\" \";a%(2)";
    assert_eq!(run_ok(source), "30 10\n");
}

#[test]
fn while_loop_runs_and_exits() {
    let source = "\
10 I%=0
20 WHILE I%<3
30 I%+=1
40 PRINT I%;
50 ENDWHILE
60 PRINT \"done\"";
    assert_eq!(run_ok(source), "123done\n");
}

#[test]
fn false_while_branches_past_endwhile() {
    assert_eq!(
        run_ok("10 WHILE FALSE:PRINT \"no\":ENDWHILE:PRINT \"ok\""),
        "ok\n"
    );
}

#[test]
fn endwhile_silently_unwinds_abandoned_inner_loops() {
    let source = "\
10 I%=0
20 WHILE I%<2
30 I%+=1
40 REPEAT
50 ENDWHILE
60 PRINT I%";
    assert_eq!(run_ok(source), "2\n");
}

#[test]
fn nested_for_loops() {
    assert_eq!(
        run_ok("10 FOR I%=1 TO 2:FOR J%=1 TO 2:PRINT I%;J%;\" \";:NEXT:NEXT"),
        "11 12 21 22 "
    );
}

#[test]
fn next_with_a_variable_list() {
    let source = "\
10 C%=0
20 FOR I%=1 TO 2
30 FOR J%=1 TO 2
40 C%+=1
50 NEXT J%,I%
60 PRINT C%";
    assert_eq!(run_ok(source), "4\n");
}

#[test]
fn for_counts_down_with_negative_step() {
    assert_eq!(
        run_ok("10 FOR I%=3 TO 1 STEP -1:PRINT I%;:NEXT"),
        "321"
    );
}

#[test]
fn for_control_can_be_a_float_variable() {
    assert_eq!(
        run_ok("10 FOR x=0 TO 1 STEP 0.5:PRINT x;\" \";:NEXT"),
        "0 0.5 1 "
    );
}

#[test]
fn gosub_and_return() {
    let source = "\
10 GOSUB 100
20 PRINT \"back\"
30 END
100 PRINT \"sub\"
110 RETURN";
    assert_eq!(run_ok(source), "sub\nback\n");
}

#[test]
fn goto_takes_the_resolved_fast_path_on_reexecution() {
    let source = "\
10 C%=C%+1
20 IF C%<3 THEN 10
30 PRINT C%";
    assert_eq!(run_ok(source), "3\n");
}

#[test]
fn computed_goto_expression() {
    let source = "\
10 target%=100
20 GOTO target%
30 PRINT \"skipped\"
100 PRINT \"landed\"";
    assert_eq!(run_ok(source), "landed\n");
}

#[test]
fn block_if_takes_the_else_branch() {
    let source = "\
10 X%=1
20 IF X%=2 THEN
30 PRINT \"two\"
40 ELSE
50 PRINT \"other\"
60 ENDIF
70 PRINT \"after\"";
    assert_eq!(run_ok(source), "other\nafter\n");
}

#[test]
fn block_if_true_body_skips_the_else_arm() {
    let source = "\
10 X%=2
20 IF X%=2 THEN
30 PRINT \"two\"
40 ELSE
50 PRINT \"other\"
60 ENDIF
70 PRINT \"after\"";
    assert_eq!(run_ok(source), "two\nafter\n");
}

#[test]
fn single_line_if_with_else() {
    assert_eq!(
        run_ok("10 IF 1=2 THEN PRINT \"then\" ELSE PRINT \"else\""),
        "else\n"
    );
    assert_eq!(
        run_ok("10 IF 1=1 THEN PRINT \"then\" ELSE PRINT \"else\""),
        "then\n"
    );
}

#[test]
fn single_line_if_without_then() {
    assert_eq!(run_ok("10 IF 1=1 PRINT \"yes\""), "yes\n");
    assert_eq!(run_ok("10 IF 1=2 PRINT \"yes\"\n20 PRINT \"no\""), "no\n");
}

#[test]
fn cascade_if_searches_for_endif() {
    let source = "\
10 IF FALSE THEN PRINT \"a\"
20 PRINT \"b\"
30 ENDIF
40 PRINT \"c\"";
    // Default mode: a single-line IF, so line 20 still runs.
    assert_eq!(run_ok(source), "b\nc\n");
    // Cascade mode: the block closes at the ENDIF.
    let program = Program::compile(source).unwrap();
    let config = Config {
        cascade_if: true,
        ..Config::default()
    };
    let mut interp = Interpreter::new(program, config).unwrap();
    let mut host = TestHost::new();
    interp.run(&mut host).unwrap();
    assert_eq!(host.output, "c\n");
}

#[test]
fn block_if_with_true_condition_and_no_endif_runs_to_the_end() {
    let source = "\
10 IF TRUE THEN
20 PRINT \"body\"";
    assert_eq!(run_ok(source), "body\n");
}

#[test]
fn case_table_is_reused_across_iterations() {
    let source = "\
10 FOR I%=1 TO 3
20 CASE I% OF
30 WHEN 1:PRINT \"one\";
40 WHEN 2:PRINT \"two\";
50 OTHERWISE:PRINT \"many\";
60 ENDCASE
70 NEXT";
    assert_eq!(run_ok(source), "onetwomany");
}

#[test]
fn case_without_a_match_falls_past_endcase() {
    let source = "\
10 CASE 9 OF
20 WHEN 1:PRINT \"one\"
30 ENDCASE
40 PRINT \"after\"";
    assert_eq!(run_ok(source), "after\n");
}

#[test]
fn case_compares_strings_bytewise() {
    let source = "\
10 a$=\"y\"
20 CASE a$ OF
30 WHEN \"x\":PRINT \"ex\"
40 WHEN \"y\":PRINT \"why\"
50 ENDCASE";
    assert_eq!(run_ok(source), "why\n");
}

#[test]
fn data_read_and_restore() {
    let source = "\
10 DATA 5, 7, hello
20 READ a%, b%, c$
30 PRINT a%+b%;\" \";c$
40 RESTORE
50 READ x%
60 PRINT x%";
    assert_eq!(run_ok(source), "12 hello\n5\n");
}

#[test]
fn restore_to_a_line_number() {
    let source = "\
10 DATA 1
20 DATA 2
30 RESTORE 20
40 READ a%
50 PRINT a%";
    assert_eq!(run_ok(source), "2\n");
}

#[test]
fn numeric_read_evaluates_the_item_text() {
    let source = "\
10 DATA 2*3+1, \"quoted, comma\"
20 READ a%, b$
30 PRINT a%;\" \";b$";
    assert_eq!(run_ok(source), "7 quoted, comma\n");
}

#[test]
fn local_data_is_restored_on_procedure_exit() {
    let source = "\
10 DATA 1,2
20 READ a%
30 PROCpeek
40 READ b%
50 PRINT a%;b%
60 END
70 DEF PROCpeek
80 LOCAL DATA
90 READ t%
100 ENDPROC";
    assert_eq!(run_ok(source), "12\n");
}

#[test]
fn local_variables_are_restored() {
    let source = "\
10 X%=5:PROCp:PRINT X%
20 END
30 DEF PROCp
40 LOCAL X%
50 X%=99
60 ENDPROC";
    assert_eq!(run_ok(source), "5\n");
}

#[test]
fn restore_local_rolls_locals_back_early() {
    let source = "\
10 X%=5:PROCp
20 END
30 DEF PROCp
40 LOCAL X%
50 X%=99
60 RESTORE LOCAL
70 PRINT X%
80 ENDPROC";
    assert_eq!(run_ok(source), "5\n");
}

#[test]
fn procedure_parameters_bind_by_value() {
    let source = "\
10 PROCgreet(\"world\", 2)
20 END
30 DEF PROCgreet(who$, times%)
40 FOR I%=1 TO times%:PRINT \"hi \";who$:NEXT
50 ENDPROC";
    assert_eq!(run_ok(source), "hi world\nhi world\n");
}

#[test]
fn array_parameters_pass_whole_arrays() {
    let source = "\
10 DIM v%(2)
20 v%(1)=21
30 PRINT FNpick(v%(),1)
40 END
50 DEF FNpick(t%(),i%)
60 =t%(i%)*2";
    assert_eq!(run_ok(source), "42\n");
}

#[test]
fn recursive_function() {
    let source = "\
10 PRINT FNfact(5)
20 END
30 DEF FNfact(n%)
40 IF n%=0 THEN =1
50 =n%*FNfact(n%-1)";
    assert_eq!(run_ok(source), "120\n");
}

#[test]
fn inline_function_definition() {
    let source = "\
10 PRINT FNd(4)
20 END
30 DEF FNd(x)=x*2.5";
    assert_eq!(run_ok(source), "10\n");
}

#[test]
fn definitions_are_skipped_by_normal_flow() {
    let source = "\
10 PRINT \"before\"
20 DEF PROCnope
30 PRINT \"hidden\"
40 ENDPROC
50 PRINT \"after\"";
    assert_eq!(run_ok(source), "before\nafter\n");
}

#[test]
fn whole_array_assignment() {
    let source = "\
10 DIM a%(3):DIM b%(3)
20 a%(1)=7
30 b%() = a%()
40 PRINT b%(1)
50 a%() = 9
60 PRINT a%(3)";
    assert_eq!(run_ok(source), "7\n9\n");
}

#[test]
fn two_dimensional_arrays_are_row_major() {
    let source = "\
10 DIM g%(2,3)
20 g%(1,2)=5
30 g%(2,0)=6
40 PRINT g%(1,2);g%(2,0);g%(0,0)";
    assert_eq!(run_ok(source), "560\n");
}

#[test]
fn swap_twice_restores_both_sides() {
    let source = "\
10 a$=\"x\":b$=\"y\"
20 SWAP a$,b$:SWAP a$,b$
30 PRINT a$;b$";
    assert_eq!(run_ok(source), "xy\n");
}

#[test]
fn swap_with_string_indirection() {
    let source = "\
10 DIM p% 20
20 $p%=\"mem\"
30 a$=\"var\"
40 SWAP a$,$p%
50 PRINT a$;\" \";$p%";
    assert_eq!(run_ok(source), "mem var\n");
}

#[test]
fn swap_whole_arrays_exchanges_descriptors() {
    let source = "\
10 DIM a%(1):DIM b%(1)
20 a%(0)=1:b%(0)=2
30 SWAP a%(),b%()
40 PRINT a%(0);b%(0)
50 SWAP a%(),b%()
60 PRINT a%(0);b%(0)";
    assert_eq!(run_ok(source), "21\n12\n");
}

#[test]
fn indirection_operators_read_and_write_the_window() {
    let source = "\
10 DIM p% 32
20 ?p%=65:p%?1=66
30 PRINT ?p%;\" \";p%?1
40 p%!4=123456:PRINT p%!4
50 |(p%+16)=2.5
60 PRINT |(p%+16)";
    assert_eq!(run_ok(source), "65 66\n123456\n2.5\n");
}

#[test]
fn string_indirection_roundtrip() {
    let source = "\
10 DIM p% 32
20 $p%=\"hello\"
30 PRINT $p%;\" \";LEN($p%)";
    assert_eq!(run_ok(source), "hello 5\n");
}

#[test]
fn empty_dim_block_yields_a_valid_address() {
    let source = "\
10 DIM a% -1
20 DIM b% 8
30 PRINT a%=b%";
    assert_eq!(run_ok(source), "-1\n");
}

#[test]
fn off_heap_blocks_allocate_and_release() {
    let source = "\
10 DIM HIMEM buf% 64
20 ?buf%=7
30 PRINT ?buf%
40 DIM HIMEM buf% -1
50 PRINT \"freed\"";
    assert_eq!(run_ok(source), "7\nfreed\n");
}

#[test]
fn off_heap_arrays_live_in_the_window() {
    let source = "\
10 DIM HIMEM a%(3)
20 a%(2)=11
30 PRINT a%(2)";
    assert_eq!(run_ok(source), "11\n");
}

#[test]
fn string_functions() {
    let source = "\
10 a$=\"BASIC rules\"
20 PRINT LEN a$
30 PRINT LEFT$(a$,5);\"/\";RIGHT$(a$,5);\"/\";MID$(a$,7,3)
40 PRINT STR$(42)+\"!\"
50 PRINT STRING$(3,\"ab\")
60 PRINT INSTR(a$,\"rules\")
70 PRINT CHR$(66);ASC(\"B\")
80 PRINT VAL(\"17cm\")";
    assert_eq!(
        run_ok(source),
        "11\nBASIC/rules/rul\n42!\nababab\n7\nB66\n17\n"
    );
}

#[test]
fn numeric_functions() {
    assert_eq!(
        run_ok("10 PRINT ABS(-5);\" \";SGN(-2);\" \";INT(2.7);\" \";INT(-2.5);\" \";SQR(9)"),
        "5 -1 2 -3 3\n"
    );
}

#[test]
fn operator_precedence() {
    assert_eq!(
        run_ok("10 PRINT 2+3*4;\" \";-2^2;\" \";7 MOD 4;\" \";7 DIV 2;\" \";1<2 AND 2<3"),
        "14 -4 3 3 -1\n"
    );
}

#[test]
fn slash_always_divides_as_float() {
    assert_eq!(run_ok("10 PRINT 7/2"), "3.5\n");
}

#[test]
fn string_concat_and_ordering() {
    assert_eq!(run_ok("10 PRINT \"a\"+\"b\";\" \";(\"a\"<\"b\")"), "ab -1\n");
}

#[test]
fn tilde_prints_hexadecimal() {
    assert_eq!(run_ok("10 PRINT ~255;\" \";~-1"), "FF FFFFFFFF\n");
}

#[test]
fn print_comma_pads_to_the_next_zone() {
    assert_eq!(run_ok("10 PRINT 1,2"), "1         2\n");
}

#[test]
fn print_apostrophe_breaks_the_line() {
    assert_eq!(run_ok("10 PRINT 1'2"), "1\n2\n");
}

#[test]
fn tab_and_spc_position_output() {
    assert_eq!(run_ok("10 PRINT \"a\";TAB(4);\"b\""), "a   b\n");
    assert_eq!(run_ok("10 PRINT \"a\";SPC 3;\"b\""), "a   b\n");
}

#[test]
fn pos_tracks_the_output_column() {
    assert_eq!(run_ok("10 PRINT \"ab\";POS"), "ab2\n");
}

#[test]
fn on_goto_selects_by_index() {
    let source = "\
10 X%=2
20 ON X% GOTO 100,200 ELSE PRINT \"none\"
30 END
100 PRINT \"one\":END
200 PRINT \"two\":END";
    assert_eq!(run_ok(source), "two\n");
}

#[test]
fn on_goto_out_of_range_takes_the_else_arm() {
    let source = "\
10 ON 9 GOTO 100,200 ELSE PRINT \"none\"
20 END
100 PRINT \"one\":END
200 PRINT \"two\":END";
    assert_eq!(run_ok(source), "none\n");
}

#[test]
fn on_gosub_returns_to_the_following_statement() {
    let source = "\
10 ON 1 GOSUB 100
20 PRINT \"after\"
30 END
100 PRINT \"sub\":RETURN";
    assert_eq!(run_ok(source), "sub\nafter\n");
}

#[test]
fn input_reads_scripted_lines() {
    let mut host = TestHost::with_input(&["Ada", "36"]);
    let source = "\
10 INPUT \"Name\", n$
20 INPUT age%
30 PRINT \"Hi \";n$;\" \";age%";
    run_with(source, &mut host).unwrap();
    assert_eq!(host.output, "Name? ?Hi Ada 36\n");
}

#[test]
fn input_splits_fields_on_commas() {
    let mut host = TestHost::with_input(&["3,4"]);
    run_with("10 INPUT a%,b%:PRINT a%*b%", &mut host).unwrap();
    assert_eq!(host.output, "?12\n");
}

#[test]
fn input_line_takes_the_whole_line() {
    let mut host = TestHost::with_input(&["hello, world"]);
    run_with("10 INPUT LINE a$\n20 PRINT a$", &mut host).unwrap();
    assert_eq!(host.output, "?hello, world\n");
}

#[test]
fn rnd_is_in_range_and_seedable() {
    let source = "\
10 X%=RND(-42)
20 A%=RND(6):B%=RND(6)
30 PRINT A%>=1 AND A%<=6 AND B%>=1 AND B%<=6";
    assert_eq!(run_ok(source), "-1\n");
}

#[test]
fn statics_survive_clear_with_zeroed_values() {
    assert_eq!(run_ok("10 A%=5:CLEAR:PRINT A%"), "0\n");
}

#[test]
fn run_restarts_but_keeps_window_bytes() {
    let source = "\
10 IF ?20=1 THEN PRINT \"done\":END
20 ?20=1
30 RUN";
    assert_eq!(run_ok(source), "done\n");
}

#[test]
fn byte_variables_wrap() {
    assert_eq!(run_ok("10 b&=300:PRINT b&"), "44\n");
    assert_eq!(run_ok("10 b&=200:PRINT b&+100"), "300\n");
}

#[test]
fn sixty_four_bit_variables_hold_wide_values() {
    assert_eq!(
        run_ok("10 n%%=5000000000:PRINT n%%"),
        "5000000000\n"
    );
}
