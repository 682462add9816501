//! Common given-name nickname clusters.
//!
//! The first entry of each cluster is its canonical key. A name may belong
//! to more than one cluster ("alex", "sam", "pat").

const CLUSTERS: &[&[&str]] = &[
    &["alexander", "alex", "xander", "sandy"],
    &["alexandra", "alex", "sandra", "lexi"],
    &["andrew", "andy", "drew"],
    &["anthony", "tony"],
    &["benjamin", "ben", "benny"],
    &["charles", "charlie", "chuck"],
    &["christopher", "chris", "kit"],
    &["christine", "chris", "chrissy", "tina"],
    &["daniel", "dan", "danny"],
    &["david", "dave", "davey"],
    &["deborah", "deb", "debbie"],
    &["donald", "don", "donnie"],
    &["edward", "ed", "eddie", "ted", "ned"],
    &["elizabeth", "liz", "lizzie", "beth", "betty", "eliza"],
    &["gregory", "greg"],
    &["jacqueline", "jackie"],
    &["james", "jim", "jimmy", "jamie"],
    &["jennifer", "jen", "jenny"],
    &["john", "jon", "johnny", "jack"],
    &["joseph", "joe", "joey"],
    &["katherine", "kate", "katie", "kathy", "catherine", "cathy"],
    &["kenneth", "ken", "kenny"],
    &["margaret", "maggie", "meg", "peggy"],
    &["matthew", "matt"],
    &["michael", "mike", "mikey", "mickey"],
    &["nicholas", "nick", "nicky"],
    &["patricia", "pat", "patty", "trish"],
    &["patrick", "pat", "paddy"],
    &["rebecca", "becky", "becca"],
    &["richard", "rick", "rich", "richie", "dick"],
    &["robert", "bob", "bobby", "rob", "robbie"],
    &["ronald", "ron", "ronnie"],
    &["samantha", "sam", "sammy"],
    &["samuel", "sam", "sammy"],
    &["stephen", "steve", "steven"],
    &["susan", "sue", "susie"],
    &["thomas", "tom", "tommy"],
    &["timothy", "tim", "timmy"],
    &["victoria", "vicky", "tori"],
    &["william", "bill", "billy", "will", "willy", "liam"],
];

/// Canonical keys of every cluster containing the normalized `name`.
pub fn clusters_for(name: &str) -> Vec<&'static str> {
    CLUSTERS
        .iter()
        .filter(|cluster| cluster.contains(&name))
        .map(|cluster| cluster[0])
        .collect()
}
