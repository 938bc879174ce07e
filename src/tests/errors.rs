//! Error raising, trapping and reporting.

use super::{run_err, run_ok, run_with, TestHost};
use crate::ErrorCode;
use assert_matches::assert_matches;

#[test]
fn zero_step_is_silly() {
    let error = run_err("10 FOR I%=1 TO 3 STEP 0:NEXT");
    assert_eq!(error.code(), ErrorCode::Silly);
}

#[test]
fn untrapped_errors_carry_their_line() {
    let error = run_err("10 A%=1\n20 PRINT 1/0");
    assert_eq!(error.code(), ErrorCode::DivisionByZero);
    assert_eq!(error.line(), Some(20));
}

#[test]
fn reading_an_unknown_variable_names_it() {
    let error = run_err("10 PRINT nope%");
    assert_eq!(error.code(), ErrorCode::NoSuchVariable);
    assert_eq!(error.name(), Some("nope%"));
}

#[test]
fn type_mismatch_between_string_and_number() {
    assert_eq!(run_err("10 PRINT \"a\"+1").code(), ErrorCode::TypeMismatch);
    assert_eq!(run_err("10 a$=\"x\":PRINT a$*2").code(), ErrorCode::TypeMismatch);
}

#[test]
fn integer_division_by_zero() {
    assert_eq!(run_err("10 PRINT 1 DIV 0").code(), ErrorCode::DivisionByZero);
    assert_eq!(run_err("10 PRINT 1 MOD 0").code(), ErrorCode::DivisionByZero);
}

#[test]
fn conversion_overflow_is_number_too_big() {
    assert_eq!(run_err("10 a%=2^40").code(), ErrorCode::NumberTooBig);
}

#[test]
fn domain_errors_from_float_functions() {
    assert_eq!(run_err("10 PRINT SQR(-1)").code(), ErrorCode::NegativeRoot);
    assert_eq!(run_err("10 PRINT LN(0)").code(), ErrorCode::LogRange);
    assert_eq!(run_err("10 PRINT ASN(2)").code(), ErrorCode::AccuracyLost);
}

#[test]
fn missing_structure_closers() {
    assert_eq!(
        run_err("10 IF FALSE THEN\n20 PRINT \"body\"").code(),
        ErrorCode::MissingEndif
    );
    assert_eq!(
        run_err("10 WHILE FALSE\n20 PRINT \"body\"").code(),
        ErrorCode::MissingEndwhile
    );
    assert_eq!(
        run_err("10 CASE 1 OF\n20 WHEN 1:PRINT \"x\"").code(),
        ErrorCode::MissingEndcase
    );
}

#[test]
fn unmatched_closers() {
    assert_eq!(run_err("10 NEXT").code(), ErrorCode::NoFor);
    assert_eq!(run_err("10 UNTIL TRUE").code(), ErrorCode::NoRepeat);
    assert_eq!(run_err("10 ENDWHILE").code(), ErrorCode::NoWhile);
    assert_eq!(run_err("10 RETURN").code(), ErrorCode::NoGosub);
    assert_eq!(run_err("10 ENDPROC").code(), ErrorCode::NoProc);
    assert_eq!(run_err("10 =1").code(), ErrorCode::NotInFunction);
}

#[test]
fn next_with_the_wrong_variable() {
    let error = run_err("10 FOR I%=1 TO 2\n20 NEXT J%");
    assert_eq!(error.code(), ErrorCode::NoFor);
}

#[test]
fn goto_to_a_missing_line() {
    let error = run_err("10 GOTO 500");
    assert_eq!(error.code(), ErrorCode::LineMissing);
    assert_eq!(error.name(), Some("500"));
}

#[test]
fn call_of_an_undefined_procedure() {
    let error = run_err("10 PROCmissing");
    assert_eq!(error.code(), ErrorCode::NoSuchProcFn);
    assert_eq!(error.name(), Some("missing"));
}

#[test]
fn argument_count_mismatches() {
    let source = "\
10 PROCone(1,2)
20 END
30 DEF PROCone(a%)
40 ENDPROC";
    assert_eq!(run_err(source).code(), ErrorCode::ArgumentCount);
    let source = "\
10 PROCone
20 END
30 DEF PROCone(a%)
40 ENDPROC";
    assert_eq!(run_err(source).code(), ErrorCode::ArgumentCount);
}

#[test]
fn dim_errors() {
    assert_eq!(
        run_err("10 DIM a%(2):DIM a%(3)").code(),
        ErrorCode::AlreadyDimensioned
    );
    assert_eq!(run_err("10 DIM a%(-2)").code(), ErrorCode::BadDim);
    assert_eq!(run_err("10 PRINT a%(") .code(), ErrorCode::NoSuchVariable);
    assert_eq!(
        run_err("10 DIM a%(2):PRINT a%(5)").code(),
        ErrorCode::BadSubscript
    );
    assert_eq!(
        run_err("10 DIM a%(2):PRINT a%(1,1)").code(),
        ErrorCode::BadDimCount
    );
    assert_eq!(run_err("10 a%(1)=0:PRINT a%(1)").code(), ErrorCode::Undimensioned);
}

#[test]
fn out_of_data() {
    let error = run_err("10 DATA 1\n20 READ a%,b%");
    assert_eq!(error.code(), ErrorCode::OutOfData);
}

#[test]
fn on_range_without_an_else() {
    let source = "\
10 ON 5 GOTO 100
20 END
100 END";
    assert_eq!(run_err(source).code(), ErrorCode::OnRange);
}

#[test]
fn string_too_long() {
    assert_eq!(
        run_err("10 PRINT STRING$(40000,\"ab\")").code(),
        ErrorCode::StringTooLong
    );
}

#[test]
fn assembler_blocks_are_unsupported() {
    assert_eq!(run_err("10 [ MOV r0, #0").code(), ErrorCode::Unsupported);
}

#[test]
fn local_outside_a_subprogram() {
    assert_eq!(run_err("10 LOCAL x%").code(), ErrorCode::NoProc);
}

#[test]
fn escape_interrupts_a_loop() {
    let mut host = TestHost::new();
    host.escape_after = Some(5);
    let result = run_with("10 REPEAT\n20 UNTIL FALSE", &mut host);
    assert_matches!(result, Err(crate::Error::Basic(ref error))
        if error.code() == ErrorCode::Escape);
}

#[test]
fn window_accesses_are_bounds_checked() {
    assert_eq!(run_err("10 PRINT ?9999999").code(), ErrorCode::WindowRange);
    assert_eq!(run_err("10 !9999999=1").code(), ErrorCode::WindowRange);
}

#[test]
fn clear_forgets_variables() {
    assert_eq!(
        run_err("10 x%=5:CLEAR\n20 PRINT x%").code(),
        ErrorCode::NoSuchVariable
    );
}

#[test]
fn on_error_handler_sees_err_and_erl() {
    let source = "\
10 ON ERROR PRINT \"E\";ERR;\" L\";ERL:REPORT:END
20 PRINT 1/0";
    assert_eq!(run_ok(source), "E18 L20\nDivision by zero");
}

#[test]
fn on_error_replaces_the_previous_handler() {
    let source = "\
10 ON ERROR PRINT \"first\":END
20 ON ERROR PRINT \"second\":END
30 PRINT 1/0";
    assert_eq!(run_ok(source), "second\n");
}

#[test]
fn on_error_off_uninstalls_the_handler() {
    let source = "\
10 ON ERROR PRINT \"caught\":END
20 ON ERROR OFF
30 PRINT 1/0";
    assert_eq!(run_err(source).code(), ErrorCode::DivisionByZero);
}

#[test]
fn local_handler_shadows_the_global_one() {
    let source = "\
10 ON ERROR PRINT \"global\":END
20 PROCtry
30 END
40 DEF PROCtry
50 ON ERROR LOCAL PRINT \"local\":ENDPROC
60 PRINT 1/0
70 ENDPROC";
    assert_eq!(run_ok(source), "local\n");
}

#[test]
fn restore_error_pops_the_local_handler() {
    let source = "\
10 ON ERROR PRINT \"outer\":END
20 PROCtry
30 END
40 DEF PROCtry
50 ON ERROR LOCAL PRINT \"inner\":ENDPROC
60 RESTORE ERROR
70 PRINT 1/0
80 ENDPROC";
    assert_eq!(run_ok(source), "outer\n");
}

#[test]
fn local_handler_dies_with_its_subprogram() {
    let source = "\
10 ON ERROR PRINT \"global\":END
20 PROCarm
30 PRINT 1/0
40 END
50 DEF PROCarm
60 ON ERROR LOCAL PRINT \"local\":ENDPROC
70 ENDPROC";
    assert_eq!(run_ok(source), "global\n");
}

#[test]
fn errors_inside_functions_reach_outer_handlers() {
    let source = "\
10 ON ERROR PRINT \"trapped\":END
20 X%=FNbad
30 END
40 DEF FNbad
50 =1/0";
    assert_eq!(run_ok(source), "trapped\n");
}

#[test]
fn handler_statements_run_in_normal_flow() {
    let source = "\
10 ON ERROR PRINT \"oops\";:GOTO 30
20 X%=X% DIV 0
30 PRINT \"carried on\"";
    assert_eq!(run_ok(source), "oopscarried on\n");
}

#[test]
fn escape_is_trappable() {
    let mut host = TestHost::new();
    host.escape_after = Some(3);
    let source = "\
10 ON ERROR PRINT \"stopped\":END
20 REPEAT
30 UNTIL FALSE";
    run_with(source, &mut host).unwrap();
    assert_eq!(host.output, "stopped\n");
}

#[test]
fn report_reprints_the_most_recent_error() {
    let source = "\
10 ON ERROR GOTO 100
20 PRINT \"x\"+1
100 REPORT
110 END";
    assert_eq!(run_ok(source), "Type mismatch");
}
